//! Scrape pipeline controller.
//!
//! Drives one scrape cycle through ordered stages. Each stage issues its
//! command, then parks until the matching notification (or query reply)
//! arrives; only then does the next stage begin. A stop command on the
//! monitor, or `stop()`, halts the run at its next suspension point.
//!
//! Full cycle:
//!   UpdatingStatus → FindingNew → CheckingDischarged
//!     → FinishingScraper → FinishingInmates → Stopped
//!
//! Missing-inmates cycle (backfill of a historical window):
//!   FindingNew → FinishingScraper → FinishingInmates → Stopped

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use ccj_common::{today, ActiveExclusion, JailId, ScraperConfig, ScraperError};

use crate::heartbeat::Heartbeat;
use crate::monitor::{Event, Monitor, Role, Subscription};
use crate::search_commands::FindInmates;
use crate::traits::{
    InmateScraper, InmateStore, ResponseReceiver, ResponseSender, SearchDispatcher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Idle,
    UpdatingStatus,
    FindingNew,
    CheckingDischarged,
    FinishingScraper,
    FinishingInmates,
    Stopped,
}

impl PipelineStage {
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::UpdatingStatus => write!(f, "updating_status"),
            Self::FindingNew => write!(f, "finding_new"),
            Self::CheckingDischarged => write!(f, "checking_discharged"),
            Self::FinishingScraper => write!(f, "finishing_scraper"),
            Self::FinishingInmates => write!(f, "finishing_inmates"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub heartbeat_interval: Duration,
    /// Days of active IDs excluded from the new-inmate search.
    pub new_inmate_search_window: u32,
    pub candidates_per_run: u32,
    pub active_exclusion: ActiveExclusion,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&ScraperConfig::default())
    }
}

impl From<&ScraperConfig> for ControllerConfig {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            new_inmate_search_window: config.new_inmate_search_window,
            candidates_per_run: config.candidates_per_run,
            active_exclusion: config.active_exclusion,
        }
    }
}

impl ControllerConfig {
    /// First day probed by the full cycle's new-inmate search.
    /// `None` when the window reaches past the calendar.
    pub fn search_start_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        today.checked_sub_days(Days::new(u64::from(self.new_inmate_search_window) + 1))
    }

    /// Active IDs the full cycle leaves out of its new-inmate search, in
    /// their original order.
    pub fn exclude_list(&self, active_ids: &[String], start_date: NaiveDate) -> Vec<String> {
        match self.active_exclusion {
            ActiveExclusion::AllActive => active_ids.to_vec(),
            ActiveExclusion::SearchWindow => active_ids
                .iter()
                .filter(|id| JailId::date_of(id).is_some_and(|booked| booked >= start_date))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    Full,
    MissingInmates { start_date: NaiveDate },
}

impl Cycle {
    fn first_stage(self) -> PipelineStage {
        match self {
            Self::Full => PipelineStage::UpdatingStatus,
            Self::MissingInmates { .. } => PipelineStage::FindingNew,
        }
    }
}

/// Why a run left its stage sequence early.
enum Halt {
    Stopped,
    Failed(ScraperError),
}

impl From<ScraperError> for Halt {
    fn from(e: ScraperError) -> Self {
        Self::Failed(e)
    }
}

impl From<anyhow::Error> for Halt {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(ScraperError::Collaborator(e))
    }
}

/// Stage of the most recently started run. Each `start` bumps the
/// generation, so tasks of an earlier run can no longer change the stage.
struct RunState {
    stage: PipelineStage,
    generation: u64,
    cancel: CancellationToken,
}

type SharedRunState = Arc<Mutex<RunState>>;

/// A pipeline task's view of its own run.
struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    monitor: Arc<Monitor>,
    search: Arc<dyn SearchDispatcher>,
    scraper: Arc<dyn InmateScraper>,
    inmates: Arc<dyn InmateStore>,
    config: ControllerConfig,
    state: SharedRunState,
    heartbeats: Arc<AtomicU64>,
    response_tx: ResponseSender,
    response_rx: tokio::sync::Mutex<ResponseReceiver>,
}

/// Handle to the scrape controller. Clones share the same state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        monitor: Arc<Monitor>,
        search: Arc<dyn SearchDispatcher>,
        scraper: Arc<dyn InmateScraper>,
        inmates: Arc<dyn InmateStore>,
        config: ControllerConfig,
    ) -> Self {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                monitor,
                search,
                scraper,
                inmates,
                config,
                state: Arc::new(Mutex::new(RunState {
                    stage: PipelineStage::Idle,
                    generation: 0,
                    cancel: CancellationToken::new(),
                })),
                heartbeats: Arc::new(AtomicU64::new(0)),
                response_tx,
                response_rx: tokio::sync::Mutex::new(response_rx),
            }),
        }
    }

    /// Start a full scrape cycle on a new task. The controller is running
    /// when this returns; the handle resolves when the cycle ends.
    pub fn run(&self) -> Result<JoinHandle<Result<(), ScraperError>>, ScraperError> {
        self.start(Cycle::Full)
    }

    /// Start the shorter cycle that searches for inmates booked on or after
    /// `start_date` that the store does not know about.
    pub fn find_missing_inmates(
        &self,
        start_date: NaiveDate,
    ) -> Result<JoinHandle<Result<(), ScraperError>>, ScraperError> {
        self.start(Cycle::MissingInmates { start_date })
    }

    /// Ask the running cycle to halt. Safe on an idle or stopped controller.
    pub fn stop(&self) {
        let (role, event) = self.stop_command();
        if !self.inner.monitor.notify(role, event) {
            // Nothing running to hear it.
            halt(&self.inner.state);
        }
    }

    /// The notification that stops this controller when published on its
    /// monitor.
    pub fn stop_command(&self) -> (Role, Event) {
        (Role::Supervisor, Event::Stop)
    }

    pub fn stage(&self) -> PipelineStage {
        lock(&self.inner.state).stage
    }

    pub fn is_running(&self) -> bool {
        self.stage().is_running()
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    /// Channel the inmate store answers queries on.
    pub fn response_sender(&self) -> ResponseSender {
        self.inner.response_tx.clone()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.inner.monitor
    }

    fn start(&self, cycle: Cycle) -> Result<JoinHandle<Result<(), ScraperError>>, ScraperError> {
        let (run, stop) = {
            let mut state = lock(&self.inner.state);
            if state.stage.is_running() {
                return Err(ScraperError::AlreadyRunning);
            }
            state.generation += 1;
            state.stage = cycle.first_stage();
            state.cancel = CancellationToken::new();

            // Subscribed under the lock: a racing stop() either reaches this
            // run's watcher or cancels the run before its first command.
            let (role, event) = self.stop_command();
            let stop = self.inner.monitor.subscribe(role, event);
            let run = ActiveRun {
                generation: state.generation,
                cancel: state.cancel.clone(),
            };
            (run, stop)
        };

        let run_id = Uuid::new_v4();
        tokio::spawn(watch_for_stop(stop, self.inner.state.clone(), run.cancel.clone()));

        let state = self.inner.state.clone();
        let generation = run.generation;
        Heartbeat::new(self.inner.config.heartbeat_interval, self.inner.heartbeats.clone()).spawn(
            move || {
                let state = lock(&state);
                state.generation == generation && state.stage.is_running()
            },
            run.cancel.clone(),
        );

        let inner = self.inner.clone();
        let span = info_span!("scrape_run", %run_id, generation, cycle = ?cycle);
        let handle = tokio::spawn(
            async move {
                info!("Scrape cycle started");
                let outcome = inner.drive(cycle, &run).await;
                retire(&inner.state, run.generation);
                run.cancel.cancel();

                match outcome {
                    Ok(()) => {
                        info!("Scrape cycle complete");
                        Ok(())
                    }
                    Err(Halt::Stopped) => {
                        info!("Scrape cycle stopped");
                        Ok(())
                    }
                    Err(Halt::Failed(e)) => {
                        warn!(error = %e, "Scrape cycle aborted");
                        Err(e)
                    }
                }
            }
            .instrument(span),
        );
        Ok(handle)
    }
}

impl Inner {
    async fn drive(&self, cycle: Cycle, run: &ActiveRun) -> Result<(), Halt> {
        let mut responses = self.response_rx.lock().await;
        // Replies to queries of an earlier, aborted run.
        while responses.try_recv().is_ok() {}
        if run.cancel.is_cancelled() {
            return Err(Halt::Stopped);
        }

        match cycle {
            Cycle::Full => {
                self.update_status_and_find_new(&mut responses, run).await?;
                self.check_discharged(&mut responses, run).await?;
            }
            Cycle::MissingInmates { start_date } => {
                self.find_missing(start_date, &mut responses, run).await?;
            }
        }
        self.finish_collaborators(run).await
    }

    async fn update_status_and_find_new(
        &self,
        responses: &mut ResponseReceiver,
        run: &ActiveRun,
    ) -> Result<(), Halt> {
        self.inmates.active_inmates_ids(self.response_tx.clone()).await?;
        let active_ids = self.receive(responses, run).await?;
        info!(active = active_ids.len(), "Received active inmates");

        let finished = self
            .monitor
            .subscribe(Role::SearchCommands, Event::FinishedUpdateInmatesStatus);
        self.search.update_inmates_status(active_ids.clone()).await?;
        self.observe(finished, run).await?;

        self.enter(PipelineStage::FindingNew, run)?;
        let window = self.config.new_inmate_search_window;
        let start_date = self.config.search_start_date(today()).ok_or_else(|| {
            ScraperError::Config(format!("search window of {window} days is out of range"))
        })?;
        let exclude_list = self.config.exclude_list(&active_ids, start_date);
        let request = FindInmates::new(self.config.candidates_per_run)
            .excluding(exclude_list)
            .starting_at(start_date);
        self.find_inmates(request, run).await
    }

    async fn check_discharged(
        &self,
        responses: &mut ResponseReceiver,
        run: &ActiveRun,
    ) -> Result<(), Halt> {
        self.enter(PipelineStage::CheckingDischarged, run)?;
        self.inmates
            .recently_discharged_inmates_ids(self.response_tx.clone())
            .await?;
        let discharged = self.receive(responses, run).await?;
        info!(discharged = discharged.len(), "Received recently discharged inmates");

        let finished = self.monitor.subscribe(
            Role::SearchCommands,
            Event::FinishedCheckOfRecentlyDischargedInmates,
        );
        self.search.check_if_really_discharged(discharged).await?;
        self.observe(finished, run).await
    }

    async fn find_missing(
        &self,
        start_date: NaiveDate,
        responses: &mut ResponseReceiver,
        run: &ActiveRun,
    ) -> Result<(), Halt> {
        self.inmates
            .known_inmates_ids_starting_with(self.response_tx.clone(), start_date)
            .await?;
        let known = self.receive(responses, run).await?;
        info!(known = known.len(), %start_date, "Received known inmates");

        let request = FindInmates::new(self.config.candidates_per_run)
            .excluding(known)
            .starting_at(start_date);
        self.find_inmates(request, run).await
    }

    async fn find_inmates(&self, request: FindInmates, run: &ActiveRun) -> Result<(), Halt> {
        let finished = self
            .monitor
            .subscribe(Role::SearchCommands, Event::FinishedFindInmates);
        self.search.find_inmates(request).await?;
        self.observe(finished, run).await
    }

    async fn finish_collaborators(&self, run: &ActiveRun) -> Result<(), Halt> {
        self.enter(PipelineStage::FinishingScraper, run)?;
        let finished = self
            .monitor
            .subscribe(Role::InmateScraper, Event::FinishedProcessing);
        self.scraper.finish().await?;
        self.observe(finished, run).await?;

        self.enter(PipelineStage::FinishingInmates, run)?;
        let finished = self.monitor.subscribe(Role::Inmates, Event::FinishedProcessing);
        self.inmates.finish().await?;
        self.observe(finished, run).await
    }

    /// Move forward to `next`, unless this run has been stopped or
    /// superseded.
    fn enter(&self, next: PipelineStage, run: &ActiveRun) -> Result<(), Halt> {
        let mut state = lock(&self.state);
        if state.generation != run.generation
            || state.stage == PipelineStage::Stopped
            || next <= state.stage
        {
            return Err(Halt::Stopped);
        }
        info!(from = %state.stage, to = %next, "Pipeline stage advanced");
        state.stage = next;
        Ok(())
    }

    async fn receive(
        &self,
        responses: &mut ResponseReceiver,
        run: &ActiveRun,
    ) -> Result<Vec<String>, Halt> {
        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => Err(Halt::Stopped),
            reply = responses.recv() => reply.ok_or(Halt::Failed(ScraperError::ResponseChannelClosed)),
        }
    }

    async fn observe(&self, finished: Subscription, run: &ActiveRun) -> Result<(), Halt> {
        let (role, event) = (finished.role(), finished.event());
        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => Err(Halt::Stopped),
            received = finished => {
                received?;
                info!(%role, %event, "Observed notification");
                Ok(())
            }
        }
    }
}

/// Halts whichever run is current when a stop command arrives, so a stop
/// picked up by the watcher of a run that already ended is not lost.
async fn watch_for_stop(stop: Subscription, state: SharedRunState, cancel: CancellationToken) {
    tokio::select! {
        biased;
        received = stop => {
            if received.is_ok() {
                info!("Stop command received");
                halt(&state);
            }
        }
        _ = cancel.cancelled() => {}
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stop the current run, if any.
fn halt(state: &Mutex<RunState>) {
    let mut state = lock(state);
    state.stage = PipelineStage::Stopped;
    state.cancel.cancel();
}

/// End of a run's task. Only the current generation may mark the
/// controller stopped.
fn retire(state: &Mutex<RunState>, generation: u64) {
    let mut state = lock(state);
    if state.generation == generation {
        state.stage = PipelineStage::Stopped;
    }
}
