//! Stand-in collaborators for exercising the controller without a roster
//! site or an inmate database.
//!
//! The scraper logs every probe and finds nobody; the store knows nobody.
//! Both report `FinishedProcessing` as soon as they are asked to finish, and
//! the scraper finalizes the run's raw inmate data snapshot on the way out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use ccj_common::JailId;

use crate::monitor::{Event, Monitor, Role};
use crate::raw_inmate_data::RawInmateData;
use crate::traits::{InmateScraper, InmateStore, ResponseSender};

pub struct DryRunScraper {
    monitor: Arc<Monitor>,
    raw_inmate_data: Mutex<RawInmateData>,
    probes: AtomicU64,
    status_checks: AtomicU64,
}

impl DryRunScraper {
    pub fn new(monitor: Arc<Monitor>, raw_inmate_data: RawInmateData) -> Self {
        Self {
            monitor,
            raw_inmate_data: Mutex::new(raw_inmate_data),
            probes: AtomicU64::new(0),
            status_checks: AtomicU64::new(0),
        }
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn status_checks(&self) -> u64 {
        self.status_checks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InmateScraper for DryRunScraper {
    async fn create_if_exists(&self, jail_id: &JailId) -> Result<()> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        debug!(%jail_id, "Dry run: would fetch roster page");
        Ok(())
    }

    async fn update_inmate_status(&self, jail_id: &str) -> Result<()> {
        self.status_checks.fetch_add(1, Ordering::Relaxed);
        debug!(jail_id, "Dry run: would refresh inmate status");
        Ok(())
    }

    async fn check_if_really_discharged(&self, jail_ids: Vec<String>) -> Result<()> {
        debug!(count = jail_ids.len(), "Dry run: would confirm discharges");
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.raw_inmate_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish()?;
        info!(
            probes = self.probes(),
            status_checks = self.status_checks(),
            "Dry run scraper finished"
        );
        self.monitor.notify(Role::InmateScraper, Event::FinishedProcessing);
        Ok(())
    }
}

pub struct DryRunInmateStore {
    monitor: Arc<Monitor>,
}

impl DryRunInmateStore {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }

    fn reply_empty(respond_to: ResponseSender) -> Result<()> {
        respond_to
            .send(Vec::new())
            .map_err(|_| anyhow::anyhow!("controller response channel closed"))
    }
}

#[async_trait]
impl InmateStore for DryRunInmateStore {
    async fn active_inmates_ids(&self, respond_to: ResponseSender) -> Result<()> {
        Self::reply_empty(respond_to)
    }

    async fn recently_discharged_inmates_ids(&self, respond_to: ResponseSender) -> Result<()> {
        Self::reply_empty(respond_to)
    }

    async fn known_inmates_ids_starting_with(
        &self,
        respond_to: ResponseSender,
        start_date: NaiveDate,
    ) -> Result<()> {
        debug!(%start_date, "Dry run: no known inmates");
        Self::reply_empty(respond_to)
    }

    async fn finish(&self) -> Result<()> {
        self.monitor.notify(Role::Inmates, Event::FinishedProcessing);
        Ok(())
    }
}
