//! Process Registry
//!
//! Authoritative map from user to running process. Membership is what every loop
//! checks before each cycle: a user missing from here winds down at its next poll
//! point, and once the global token is cancelled every loop does.
//!
//! Each entry owns a child of the global cancellation token so a deregistered
//! user's sleep wakes immediately instead of waiting out its interval.
//!
//! A deregistered user is started again by the next monitor scan. A retired user
//! (one told to stop) is not, until [`ProcessRegistry::readmit`] is called, even
//! though its join record remains.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ids::UserId;
use crate::state::ConversationState;

/// Phase a user's process is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    Initialization,
    Ooda,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Initialization => write!(f, "initialization"),
            Self::Ooda => write!(f, "ooda"),
        }
    }
}

struct Entry {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    /// Latest published state; `None` until discovery first composes it
    state: Option<ConversationState>,
    phase: Phase,
}

pub struct ProcessRegistry {
    entries: Mutex<HashMap<UserId, Entry>>,
    /// Users told to stop
    retired_users: Mutex<HashSet<UserId>>,
    /// Handles of tasks removed from the map that may still be winding down
    parked: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retired_users: Mutex::new(HashSet::new()),
            parked: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Claim a slot for `user`
    ///
    /// Returns the user's cancellation token, or `None` if the user is already
    /// registered, retired, or the registry has been stopped.
    pub fn register(&self, user: UserId) -> Option<CancellationToken> {
        if self.is_stopped() || self.is_retired(user) {
            return None;
        }
        let mut entries = self.entries.lock();
        if entries.contains_key(&user) {
            return None;
        }
        let token = self.shutdown.child_token();
        entries.insert(
            user,
            Entry {
                token: token.clone(),
                handle: None,
                state: None,
                phase: Phase::Discovery,
            },
        );
        debug!(user_id = %user, "Registered user process");
        Some(token)
    }

    /// Attach the spawned task to its slot
    ///
    /// A task that already left the registry is kept for [`take_handles`](Self::take_handles).
    pub fn attach_handle(&self, user: UserId, handle: JoinHandle<()>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&user) {
            Some(entry) => entry.handle = Some(handle),
            None => {
                drop(entries);
                self.park(handle);
            }
        }
    }

    pub fn is_registered(&self, user: UserId) -> bool {
        self.entries.lock().contains_key(&user)
    }

    /// Whether the monitor should leave this user alone
    pub fn is_known(&self, user: UserId) -> bool {
        self.is_registered(user) || self.is_retired(user)
    }

    pub fn is_retired(&self, user: UserId) -> bool {
        self.retired_users.lock().contains(&user)
    }

    /// Allow a retired user to be started again
    pub fn readmit(&self, user: UserId) -> bool {
        self.retired_users.lock().remove(&user)
    }

    /// Remove a user and drop its state; absent users are ignored
    ///
    /// The monitor may start the user again on its next scan.
    pub fn deregister(&self, user: UserId) -> bool {
        let removed = self.entries.lock().remove(&user);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                if let Some(handle) = entry.handle {
                    self.park(handle);
                }
                info!(user_id = %user, "Deregistered user process");
                true
            }
            None => false,
        }
    }

    /// Deregister a user and keep the monitor from starting it again
    pub fn retire(&self, user: UserId) -> bool {
        self.retired_users.lock().insert(user);
        self.deregister(user)
    }

    /// Set the global stop flag and clear every entry
    pub fn stop_all(&self) {
        self.shutdown.cancel();
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.token.cancel();
            if let Some(handle) = entry.handle {
                self.park(handle);
            }
        }
        info!("Stopped all user processes ({} active)", count);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Global token, cancelled by [`stop_all`](Self::stop_all)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Publish the user's current state; ignored once the user is gone
    pub fn set_state(&self, user: UserId, state: &ConversationState) {
        if let Some(entry) = self.entries.lock().get_mut(&user) {
            entry.state = Some(state.clone());
        }
    }

    pub fn state(&self, user: UserId) -> Option<ConversationState> {
        self.entries.lock().get(&user).and_then(|e| e.state.clone())
    }

    pub fn set_phase(&self, user: UserId, phase: Phase) {
        if let Some(entry) = self.entries.lock().get_mut(&user) {
            debug!(user_id = %user, "Entering {} phase", phase);
            entry.phase = phase;
        }
    }

    pub fn phase(&self, user: UserId) -> Option<Phase> {
        self.entries.lock().get(&user).map(|e| e.phase)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Take every known task handle, registered or already removed
    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.parked.lock().drain(..).collect();
        for entry in self.entries.lock().values_mut() {
            if let Some(handle) = entry.handle.take() {
                handles.push(handle);
            }
        }
        handles
    }

    fn park(&self, handle: JoinHandle<()>) {
        let mut parked = self.parked.lock();
        parked.retain(|h| !h.is_finished());
        parked.push(handle);
    }
}
