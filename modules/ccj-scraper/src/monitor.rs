//! Notification bus between the controller and its collaborators.
//!
//! Senders are identified by [`Role`], not by instance. A `notify` wakes at
//! most one waiter registered for the same `(Role, Event)` pair and is
//! dropped when nobody is waiting, so callers that must not miss an event
//! [`subscribe`](Monitor::subscribe) before triggering the work that emits it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use ccj_common::ScraperError;

/// Logical sender of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    SearchCommands,
    InmateScraper,
    Inmates,
    RawInmateData,
    /// Whoever drives the controller (CLI, scheduler, tests).
    Supervisor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SearchCommands => write!(f, "search_commands"),
            Self::InmateScraper => write!(f, "inmate_scraper"),
            Self::Inmates => write!(f, "inmates"),
            Self::RawInmateData => write!(f, "raw_inmate_data"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    FinishedUpdateInmatesStatus,
    FinishedFindInmates,
    FinishedCheckOfRecentlyDischargedInmates,
    FinishedProcessing,
    Stop,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FinishedUpdateInmatesStatus => write!(f, "finished_update_inmates_status"),
            Self::FinishedFindInmates => write!(f, "finished_find_inmates"),
            Self::FinishedCheckOfRecentlyDischargedInmates => {
                write!(f, "finished_check_of_recently_discharged_inmates")
            }
            Self::FinishedProcessing => write!(f, "finished_processing"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

type Waiters = HashMap<(Role, Event), VecDeque<oneshot::Sender<()>>>;

#[derive(Debug, Default)]
pub struct Monitor {
    waiters: Mutex<Waiters>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` from `role` to the oldest live waiter for that pair.
    /// Returns whether a waiter was woken.
    pub fn notify(&self, role: Role, event: Event) -> bool {
        let key = (role, event);
        let mut waiters = self.waiters();

        let delivered = match waiters.get_mut(&key) {
            Some(queue) => loop {
                match queue.pop_front() {
                    // A failed send means that waiter was dropped; try the next one.
                    Some(tx) => {
                        if tx.send(()).is_ok() {
                            break true;
                        }
                    }
                    None => break false,
                }
            },
            None => false,
        };

        if waiters.get(&key).is_some_and(VecDeque::is_empty) {
            waiters.remove(&key);
        }

        debug!(%role, %event, delivered, "Notification");
        delivered
    }

    /// Register interest in `(role, event)`. The returned future resolves on
    /// the first matching `notify` issued after this call.
    pub fn subscribe(&self, role: Role, event: Event) -> Subscription {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters();
        let queue = waiters.entry((role, event)).or_default();
        queue.retain(|waiter| !waiter.is_closed());
        queue.push_back(tx);
        Subscription { role, event, rx }
    }

    /// Suspend until `role` emits `event`.
    pub async fn wait_for(&self, role: Role, event: Event) -> Result<(), ScraperError> {
        self.subscribe(role, event).await
    }

    /// Number of live waiters for `(role, event)`.
    pub fn pending(&self, role: Role, event: Event) -> usize {
        self.waiters()
            .get(&(role, event))
            .map(|queue| queue.iter().filter(|waiter| !waiter.is_closed()).count())
            .unwrap_or(0)
    }

    /// Diagnostic report from a collaborator.
    pub fn debug(&self, role: Role, message: &str) {
        debug!(%role, "{message}");
    }
}

/// A pending wait registered with [`Monitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    role: Role,
    event: Event,
    rx: oneshot::Receiver<()>,
}

impl Subscription {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn event(&self) -> Event {
        self.event
    }
}

impl Future for Subscription {
    type Output = Result<(), ScraperError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| ScraperError::BusClosed))
    }
}
