// Capability boundaries of the scrape controller.
//
// InmateStore: the persistent inmate records (queries answer on a channel).
// InmateScraper: fetches roster pages and writes what it finds.
// SearchDispatcher: expands scrape intents into InmateScraper calls.
//
// Each has a recording fake in `testing` so the controller can be driven
// step by step without a database or network.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

use ccj_common::JailId;

use crate::search_commands::FindInmates;

/// Channel on which the inmate store answers a controller query with a list
/// of jail IDs.
pub type ResponseSender = mpsc::UnboundedSender<Vec<String>>;
pub type ResponseReceiver = mpsc::UnboundedReceiver<Vec<String>>;

#[async_trait]
pub trait InmateStore: Send + Sync {
    /// Post the IDs of every inmate currently in custody to `respond_to`.
    async fn active_inmates_ids(&self, respond_to: ResponseSender) -> Result<()>;

    /// Post the IDs of inmates discharged in the last few days to `respond_to`.
    async fn recently_discharged_inmates_ids(&self, respond_to: ResponseSender) -> Result<()>;

    /// Post the IDs of every known inmate booked on or after `start_date`.
    async fn known_inmates_ids_starting_with(
        &self,
        respond_to: ResponseSender,
        start_date: NaiveDate,
    ) -> Result<()>;

    /// Flush pending writes; emits `(Inmates, FinishedProcessing)` when done.
    async fn finish(&self) -> Result<()>;
}

#[async_trait]
pub trait InmateScraper: Send + Sync {
    /// Fetch the roster page for `jail_id` and record the inmate if it exists.
    async fn create_if_exists(&self, jail_id: &JailId) -> Result<()>;

    async fn update_inmate_status(&self, jail_id: &str) -> Result<()>;

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()>;

    /// Drain outstanding work; emits `(InmateScraper, FinishedProcessing)` when done.
    async fn finish(&self) -> Result<()>;
}

#[async_trait]
pub trait SearchDispatcher: Send + Sync {
    /// Emits `(SearchCommands, FinishedFindInmates)` when every candidate is processed.
    async fn find_inmates(&self, request: FindInmates) -> Result<()>;

    /// Emits `(SearchCommands, FinishedUpdateInmatesStatus)` when done.
    async fn update_inmates_status(&self, jail_ids: Vec<String>) -> Result<()>;

    /// Emits `(SearchCommands, FinishedCheckOfRecentlyDischargedInmates)` when done.
    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()>;
}
