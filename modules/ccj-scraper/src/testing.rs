// Recording fakes for the controller's collaborators.
//
// All three write into one shared CallLog so tests can assert on the exact
// interleaving of store, dispatcher and scraper calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use ccj_common::JailId;

use crate::search_commands::FindInmates;
use crate::traits::{InmateScraper, InmateStore, ResponseSender, SearchDispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    // InmateStore
    ActiveInmatesIds,
    RecentlyDischargedInmatesIds,
    KnownInmatesIdsStartingWith(NaiveDate),
    InmatesFinish,
    // InmateScraper
    CreateIfExists(String),
    UpdateInmateStatus(String),
    CheckIfReallyDischarged(Vec<String>),
    ScraperFinish,
    // SearchDispatcher
    FindInmates(FindInmates),
    UpdateInmatesStatus(Vec<String>),
    DispatchCheckIfReallyDischarged(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Call> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// RecordingScraper
// ---------------------------------------------------------------------------

pub struct RecordingScraper {
    log: CallLog,
    fail_on: Option<String>,
}

impl RecordingScraper {
    pub fn new(log: CallLog) -> Self {
        Self { log, fail_on: None }
    }

    /// Make `create_if_exists` fail (after recording) for this ID.
    pub fn failing_on(mut self, jail_id: &str) -> Self {
        self.fail_on = Some(jail_id.to_string());
        self
    }
}

#[async_trait]
impl InmateScraper for RecordingScraper {
    async fn create_if_exists(&self, jail_id: &JailId) -> Result<()> {
        let jail_id = jail_id.to_string();
        self.log.record(Call::CreateIfExists(jail_id.clone()));
        if self.fail_on.as_deref() == Some(jail_id.as_str()) {
            bail!("RecordingScraper: roster fetch failed for {jail_id}");
        }
        Ok(())
    }

    async fn update_inmate_status(&self, jail_id: &str) -> Result<()> {
        self.log.record(Call::UpdateInmateStatus(jail_id.to_string()));
        Ok(())
    }

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        self.log.record(Call::CheckIfReallyDischarged(jail_ids));
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.log.record(Call::ScraperFinish);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingInmateStore
// ---------------------------------------------------------------------------

/// Records queries without answering them; tests reply through the
/// controller's response sender.
pub struct RecordingInmateStore {
    log: CallLog,
    fail_queries: bool,
}

impl RecordingInmateStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_queries: false,
        }
    }

    /// Make every query fail after being recorded.
    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    fn query(&self, call: Call) -> Result<()> {
        self.log.record(call);
        if self.fail_queries {
            bail!("RecordingInmateStore: database unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl InmateStore for RecordingInmateStore {
    async fn active_inmates_ids(&self, _respond_to: ResponseSender) -> Result<()> {
        self.query(Call::ActiveInmatesIds)
    }

    async fn recently_discharged_inmates_ids(&self, _respond_to: ResponseSender) -> Result<()> {
        self.query(Call::RecentlyDischargedInmatesIds)
    }

    async fn known_inmates_ids_starting_with(
        &self,
        _respond_to: ResponseSender,
        start_date: NaiveDate,
    ) -> Result<()> {
        self.query(Call::KnownInmatesIdsStartingWith(start_date))
    }

    async fn finish(&self) -> Result<()> {
        self.log.record(Call::InmatesFinish);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSearch
// ---------------------------------------------------------------------------

pub struct RecordingSearch {
    log: CallLog,
    delay: Duration,
}

impl RecordingSearch {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            delay: Duration::ZERO,
        }
    }

    /// Each dispatch records its call, then takes `delay` to return.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn dispatch(&self, call: Call) -> Result<()> {
        self.log.record(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SearchDispatcher for RecordingSearch {
    async fn find_inmates(&self, request: FindInmates) -> Result<()> {
        self.dispatch(Call::FindInmates(request)).await
    }

    async fn update_inmates_status(&self, jail_ids: Vec<String>) -> Result<()> {
        self.dispatch(Call::UpdateInmatesStatus(jail_ids)).await
    }

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        self.dispatch(Call::DispatchCheckIfReallyDischarged(jail_ids)).await
    }
}
