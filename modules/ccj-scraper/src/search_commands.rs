//! Expands scrape intents into per-candidate scraper calls.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ccj_common::{yesterday, JailId};

use crate::monitor::{Event, Monitor, Role};
use crate::traits::{InmateScraper, SearchDispatcher};

/// A new-inmate search: `number_to_fetch` candidate IDs walking backward
/// from `start_date`, skipping anything in `exclude_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInmates {
    pub exclude_list: Vec<String>,
    pub number_to_fetch: u32,
    pub start_date: NaiveDate,
}

impl FindInmates {
    /// Search starting yesterday with nothing excluded.
    pub fn new(number_to_fetch: u32) -> Self {
        Self {
            exclude_list: Vec::new(),
            number_to_fetch,
            start_date: yesterday(),
        }
    }

    pub fn excluding(mut self, exclude_list: Vec<String>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    pub fn starting_at(mut self, start_date: NaiveDate) -> Self {
        self.start_date = start_date;
        self
    }
}

/// Candidate IDs in probe order: most recent day first, sequence numbers
/// `1..=per_day` ascending within a day. Ends early at the first day before
/// the calendar's range.
pub fn candidate_ids(
    start_date: NaiveDate,
    number_to_fetch: u32,
    per_day: u32,
) -> impl Iterator<Item = JailId> {
    let per_day = per_day.max(1);
    (0..number_to_fetch).map_while(move |n| {
        let day = start_date.checked_sub_days(Days::new(u64::from(n / per_day)))?;
        Some(JailId::new(day, n % per_day + 1))
    })
}

/// Runs search commands against an [`InmateScraper`], announcing completion
/// of each command on the monitor.
pub struct SearchCommands {
    scraper: Arc<dyn InmateScraper>,
    monitor: Arc<Monitor>,
    candidates_per_day: u32,
}

impl SearchCommands {
    pub fn new(scraper: Arc<dyn InmateScraper>, monitor: Arc<Monitor>, candidates_per_day: u32) -> Self {
        Self {
            scraper,
            monitor,
            candidates_per_day,
        }
    }

    /// Move command execution onto its own task. Commands sent through the
    /// returned queue run one at a time in submission order. The task ends
    /// when every queue handle is dropped, or with the first scraper error.
    pub fn spawn(self) -> (SearchQueue, JoinHandle<Result<()>>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                self.execute(command).await?;
            }
            debug!("Search command queue closed");
            Ok(())
        });
        (SearchQueue { tx }, handle)
    }

    async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::FindInmates(request) => self.run_find_inmates(request).await,
            Command::UpdateInmatesStatus(jail_ids) => self.run_update_inmates_status(jail_ids).await,
            Command::CheckIfReallyDischarged(jail_ids) => {
                self.run_check_if_really_discharged(jail_ids).await
            }
        }
    }

    async fn run_find_inmates(&self, request: FindInmates) -> Result<()> {
        let excluded: HashSet<&str> = request.exclude_list.iter().map(String::as_str).collect();
        info!(
            start_date = %request.start_date,
            number_to_fetch = request.number_to_fetch,
            excluded = excluded.len(),
            "Searching for new inmates"
        );

        let mut probed = 0u32;
        for jail_id in candidate_ids(
            request.start_date,
            request.number_to_fetch,
            self.candidates_per_day,
        ) {
            if excluded.contains(jail_id.to_string().as_str()) {
                continue;
            }
            debug!(%jail_id, "Probing candidate");
            self.scraper.create_if_exists(&jail_id).await?;
            probed += 1;
        }

        info!(probed, "Finished new inmate search");
        self.monitor.notify(Role::SearchCommands, Event::FinishedFindInmates);
        Ok(())
    }

    async fn run_update_inmates_status(&self, jail_ids: Vec<String>) -> Result<()> {
        info!(count = jail_ids.len(), "Updating inmate statuses");
        for jail_id in &jail_ids {
            self.scraper.update_inmate_status(jail_id).await?;
        }
        self.monitor
            .notify(Role::SearchCommands, Event::FinishedUpdateInmatesStatus);
        Ok(())
    }

    async fn run_check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        info!(count = jail_ids.len(), "Checking recently discharged inmates");
        self.scraper.check_if_really_discharged(jail_ids).await?;
        self.monitor.notify(
            Role::SearchCommands,
            Event::FinishedCheckOfRecentlyDischargedInmates,
        );
        Ok(())
    }
}

/// Runs each command to completion before returning.
#[async_trait]
impl SearchDispatcher for SearchCommands {
    async fn find_inmates(&self, request: FindInmates) -> Result<()> {
        self.run_find_inmates(request).await
    }

    async fn update_inmates_status(&self, jail_ids: Vec<String>) -> Result<()> {
        self.run_update_inmates_status(jail_ids).await
    }

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        self.run_check_if_really_discharged(jail_ids).await
    }
}

#[derive(Debug)]
enum Command {
    FindInmates(FindInmates),
    UpdateInmatesStatus(Vec<String>),
    CheckIfReallyDischarged(Vec<String>),
}

/// Handle to a [`SearchCommands`] task. Dispatch returns as soon as the
/// command is queued.
#[derive(Debug, Clone)]
pub struct SearchQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl SearchQueue {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("search command task has shut down"))
    }
}

#[async_trait]
impl SearchDispatcher for SearchQueue {
    async fn find_inmates(&self, request: FindInmates) -> Result<()> {
        self.send(Command::FindInmates(request))
    }

    async fn update_inmates_status(&self, jail_ids: Vec<String>) -> Result<()> {
        self.send(Command::UpdateInmatesStatus(jail_ids))
    }

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        self.send(Command::CheckIfReallyDischarged(jail_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, CallLog, RecordingScraper};
    use futures::FutureExt;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(per_day: u32) -> (SearchCommands, CallLog, Arc<Monitor>) {
        let log = CallLog::default();
        let monitor = Arc::new(Monitor::new());
        let scraper = Arc::new(RecordingScraper::new(log.clone()));
        (SearchCommands::new(scraper, monitor.clone(), per_day), log, monitor)
    }

    fn created(ids: &[&str]) -> Vec<Call> {
        ids.iter().map(|id| Call::CreateIfExists(id.to_string())).collect()
    }

    #[test]
    fn candidates_walk_backward_by_day_ascending_within_day() {
        let ids: Vec<String> = candidate_ids(day(2014, 3, 2), 7, 3)
            .map(|id| id.to_string())
            .collect();
        assert_eq!(
            ids,
            vec![
                "2014-0302001",
                "2014-0302002",
                "2014-0302003",
                "2014-0301001",
                "2014-0301002",
                "2014-0301003",
                "2014-0228001",
            ]
        );
    }

    #[test]
    fn candidates_stop_at_the_start_of_the_calendar() {
        let ids: Vec<JailId> = candidate_ids(NaiveDate::MIN, 10, 3).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.booking_date() == NaiveDate::MIN));
    }

    #[test]
    fn candidate_count_matches_request_and_ids_are_unique() {
        for n in [1, 2, 349, 350, 351, 1000] {
            let ids: Vec<JailId> = candidate_ids(day(2020, 1, 10), n, 350).collect();
            assert_eq!(ids.len(), n as usize);
            let unique: HashSet<_> = ids.iter().collect();
            assert_eq!(unique.len(), ids.len());
            assert!(ids.windows(2).all(|w| {
                let (a, b) = (&w[0], &w[1]);
                a.booking_date() > b.booking_date()
                    || (a.booking_date() == b.booking_date() && a.sequence() < b.sequence())
            }));
        }
    }

    #[tokio::test]
    async fn find_inmates_probes_each_candidate_then_notifies() {
        let (search, log, monitor) = setup(350);
        let finished = monitor.subscribe(Role::SearchCommands, Event::FinishedFindInmates);

        let start = yesterday();
        search.find_inmates(FindInmates::new(3)).await.unwrap();

        let expected: Vec<Call> = candidate_ids(start, 3, 350)
            .map(|id| Call::CreateIfExists(id.to_string()))
            .collect();
        assert_eq!(log.calls(), expected);
        finished.await.unwrap();
    }

    #[tokio::test]
    async fn find_inmates_skips_excluded_ids_in_order() {
        let (search, log, _monitor) = setup(350);
        let start = day(2013, 6, 1);
        let all: Vec<String> = candidate_ids(start, 4, 350).map(|id| id.to_string()).collect();

        let request = FindInmates::new(4)
            .starting_at(start)
            .excluding(all[1..3].to_vec());
        search.find_inmates(request).await.unwrap();

        assert_eq!(log.calls(), created(&["2013-0601001", "2013-0601004"]));
    }

    #[tokio::test]
    async fn update_inmates_status_preserves_input_order() {
        let (search, log, monitor) = setup(350);
        let finished = monitor.subscribe(Role::SearchCommands, Event::FinishedUpdateInmatesStatus);
        let ids: Vec<String> = (0..8).map(|n| n.to_string()).collect();

        search.update_inmates_status(ids.clone()).await.unwrap();

        let expected: Vec<Call> = ids.into_iter().map(Call::UpdateInmateStatus).collect();
        assert_eq!(log.calls(), expected);
        finished.await.unwrap();
    }

    #[tokio::test]
    async fn check_if_really_discharged_passes_list_through() {
        let (search, log, monitor) = setup(350);
        let finished = monitor.subscribe(
            Role::SearchCommands,
            Event::FinishedCheckOfRecentlyDischargedInmates,
        );
        let ids = vec!["2013-0601001".to_string(), "2013-0601002".to_string()];

        search.check_if_really_discharged(ids.clone()).await.unwrap();

        assert_eq!(log.calls(), vec![Call::CheckIfReallyDischarged(ids)]);
        finished.await.unwrap();
    }

    #[tokio::test]
    async fn scraper_failure_propagates_without_notification() {
        let log = CallLog::default();
        let monitor = Arc::new(Monitor::new());
        let scraper = Arc::new(RecordingScraper::new(log.clone()).failing_on("2013-0601002"));
        let search = SearchCommands::new(scraper, monitor.clone(), 350);
        let mut finished = monitor.subscribe(Role::SearchCommands, Event::FinishedFindInmates);

        let request = FindInmates::new(3).starting_at(day(2013, 6, 1));
        assert!(search.find_inmates(request).await.is_err());

        assert_eq!(log.calls(), created(&["2013-0601001", "2013-0601002"]));
        assert!((&mut finished).now_or_never().is_none());
    }

    #[tokio::test]
    async fn queued_commands_run_in_order_on_their_own_task() {
        let (search, log, monitor) = setup(2);
        let status_done = monitor.subscribe(Role::SearchCommands, Event::FinishedUpdateInmatesStatus);
        let find_done = monitor.subscribe(Role::SearchCommands, Event::FinishedFindInmates);
        let (queue, task) = search.spawn();

        queue.update_inmates_status(vec!["a".into()]).await.unwrap();
        queue
            .find_inmates(FindInmates::new(3).starting_at(day(2013, 6, 1)))
            .await
            .unwrap();

        status_done.await.unwrap();
        find_done.await.unwrap();
        assert_eq!(
            log.calls(),
            vec![
                Call::UpdateInmateStatus("a".into()),
                Call::CreateIfExists("2013-0601001".into()),
                Call::CreateIfExists("2013-0601002".into()),
                Call::CreateIfExists("2013-0531001".into()),
            ]
        );

        drop(queue);
        task.await.unwrap().unwrap();
    }
}
