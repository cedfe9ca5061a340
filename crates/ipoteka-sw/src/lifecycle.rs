//! Worker versions and the registration state machine.
//!
//! ```text
//! parsed → installing → installed (waiting) → activating → activated
//!              │                                               │
//!              └──────────── redundant ◄───────────────────────┘ (replaced)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ServiceWorkerError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or replaced by a newer version.
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// One deployed version of the worker.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: WorkerId,

    /// Static store generation this version installs.
    pub generation: String,

    pub state: WorkerState,

    /// Set by install or a `SKIP_WAITING` message.
    pub skip_waiting: bool,

    /// Error message if install failed.
    pub error: Option<String>,

    pub state_changed_at: Instant,
}

impl WorkerVersion {
    pub fn new(generation: impl Into<String>) -> Self {
        Self {
            id: WorkerId::new(),
            generation: generation.into(),
            state: WorkerState::Parsed,
            skip_waiting: false,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }
}

/// The registration: at most one installing, one waiting and one active version.
#[derive(Debug, Default)]
pub struct Registration {
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start installing a new version.
    pub fn begin_install(&mut self, generation: &str) -> Result<WorkerId, ServiceWorkerError> {
        if let Some(ref installing) = self.installing {
            return Err(ServiceWorkerError::State(format!(
                "{} is still installing",
                installing.id
            )));
        }
        let mut worker = WorkerVersion::new(generation);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        Ok(id)
    }

    /// Installing → installed (waiting). A previously waiting version becomes
    /// redundant and is returned.
    pub fn install_complete(
        &mut self,
        skip_waiting: bool,
    ) -> Result<(WorkerId, Option<WorkerVersion>), ServiceWorkerError> {
        let mut worker = self
            .installing
            .take()
            .ok_or_else(|| ServiceWorkerError::State("no installing worker".to_string()))?;
        worker.set_state(WorkerState::Installed);
        worker.skip_waiting = skip_waiting;
        let id = worker.id;
        let superseded = self.waiting.replace(worker).map(|mut stale| {
            stale.set_state(WorkerState::Redundant);
            info!(worker = %stale.id, "Waiting worker replaced");
            stale
        });
        Ok((id, superseded))
    }

    /// Installing → redundant.
    pub fn install_failed(&mut self, error: impl Into<String>) -> Option<WorkerVersion> {
        let mut worker = self.installing.take()?;
        worker.error = Some(error.into());
        worker.set_state(WorkerState::Redundant);
        Some(worker)
    }

    /// Mark the waiting version as allowed to skip the waiting hold.
    pub fn request_skip_waiting(&mut self) -> bool {
        match self.waiting.as_mut() {
            Some(worker) => {
                worker.skip_waiting = true;
                true
            }
            None => false,
        }
    }

    /// Whether the waiting version may activate now.
    ///
    /// True when it asked to skip waiting, when nothing is active, or when the
    /// active version controls no clients.
    pub fn can_activate(&self, active_clients: usize) -> bool {
        match self.waiting {
            Some(ref waiting) => waiting.skip_waiting || self.active.is_none() || active_clients == 0,
            None => false,
        }
    }

    /// Waiting → activating. The previous active version becomes redundant.
    pub fn begin_activate(&mut self) -> Result<(WorkerVersion, Option<WorkerVersion>), ServiceWorkerError> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::State("no waiting worker".to_string()))?;
        worker.set_state(WorkerState::Activating);
        let replaced = self.active.take().map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old
        });
        self.active = Some(worker.clone());
        Ok((worker, replaced))
    }

    /// Activating → activated.
    pub fn activate_complete(&mut self) -> Result<WorkerId, ServiceWorkerError> {
        match self.active.as_mut() {
            Some(worker) if worker.state == WorkerState::Activating => {
                worker.set_state(WorkerState::Activated);
                Ok(worker.id)
            }
            Some(worker) => Err(ServiceWorkerError::State(format!(
                "{} is {}, not activating",
                worker.id, worker.state
            ))),
            None => Err(ServiceWorkerError::State("no activating worker".to_string())),
        }
    }

    /// The active version, once activation finished.
    pub fn active_id(&self) -> Option<WorkerId> {
        self.active.as_ref().filter(|w| w.is_active()).map(|w| w.id)
    }

    /// Look up a version by ID in any slot.
    pub fn find(&self, id: WorkerId) -> Option<&WorkerVersion> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }
}
