//! The host container: plays the browser's part of the lifecycle.

use std::sync::Arc;

use hashbrown::HashMap;
use ipoteka_common::OptionExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::clients::Client;
use crate::config::WorkerConfig;
use crate::lifecycle::{Registration, WorkerId, WorkerState};
use crate::push::Notification;
use crate::request::CacheableRequest;
use crate::router::FetchOutcome;
use crate::worker::{ClickOutcome, ControlMessage, NotificationClick, OfflineWorker, WorkerServices};
use crate::ServiceWorkerError;

/// Lifecycle events broadcast by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A new version started installing.
    UpdateFound { worker: WorkerId },
    /// A version changed state.
    StateChange { worker: WorkerId, state: WorkerState },
    /// A client switched controller.
    ControllerChange { client_id: String, worker: WorkerId },
    /// Install failed; the version is redundant.
    InstallFailed { worker: WorkerId, error: String },
}

/// Owns the registration and routes events to worker versions.
pub struct WorkerHost {
    services: WorkerServices,
    registration: RwLock<Registration>,
    workers: RwLock<HashMap<WorkerId, Arc<OfflineWorker>>>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHost {
    /// Create a host around shared platform services.
    pub fn new(services: WorkerServices) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                services,
                registration: RwLock::new(Registration::new()),
                workers: RwLock::new(HashMap::new()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn services(&self) -> &WorkerServices {
        &self.services
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn state_change(&self, worker: WorkerId, state: WorkerState) {
        info!(%worker, %state, "Worker state changed");
        self.emit(WorkerEvent::StateChange { worker, state });
    }

    /// Deploy a new worker version: install it, then activate it if nothing holds it back.
    pub async fn deploy(&self, config: WorkerConfig) -> Result<WorkerId, ServiceWorkerError> {
        let config = Arc::new(config);
        let id = self
            .registration
            .write()
            .await
            .begin_install(&config.static_cache)?;
        self.emit(WorkerEvent::UpdateFound { worker: id });
        self.state_change(id, WorkerState::Installing);

        let installed = match OfflineWorker::new(id, config, self.services.clone()) {
            Ok(worker) => {
                let worker = Arc::new(worker);
                worker.install().await.map(|outcome| (worker, outcome))
            }
            Err(e) => Err(e),
        };

        let (worker, outcome) = match installed {
            Ok(installed) => installed,
            Err(e) => {
                self.registration.write().await.install_failed(e.to_string());
                warn!(worker = %id, error = %e, "Install failed");
                self.emit(WorkerEvent::InstallFailed {
                    worker: id,
                    error: e.to_string(),
                });
                self.state_change(id, WorkerState::Redundant);
                return Err(e);
            }
        };

        self.workers.write().await.insert(id, worker);
        let (installed, superseded) = self
            .registration
            .write()
            .await
            .install_complete(outcome.skip_waiting)?;
        debug_assert_eq!(installed, id);
        if let Some(stale) = superseded {
            self.workers.write().await.remove(&stale.id);
            self.state_change(stale.id, WorkerState::Redundant);
        }
        self.state_change(id, WorkerState::Installed);

        self.try_activate().await?;
        Ok(id)
    }

    /// Activate the waiting version if the waiting hold allows it.
    pub async fn try_activate(&self) -> Result<bool, ServiceWorkerError> {
        let ready = {
            let registration = self.registration.read().await;
            let held_clients = match registration.active_id() {
                Some(active) => self.services.clients.read().await.controlled_by(active),
                None => 0,
            };
            registration.can_activate(held_clients)
        };
        if !ready {
            return Ok(false);
        }
        self.activate_waiting().await?;
        Ok(true)
    }

    async fn activate_waiting(&self) -> Result<(), ServiceWorkerError> {
        let (version, replaced) = self.registration.write().await.begin_activate()?;
        if let Some(old) = replaced {
            self.workers.write().await.remove(&old.id);
            self.state_change(old.id, WorkerState::Redundant);
        }
        self.state_change(version.id, WorkerState::Activating);

        let worker = self.worker(version.id).await?;
        let claimed = worker.activate().await?;
        self.registration.write().await.activate_complete()?;
        self.state_change(version.id, WorkerState::Activated);

        for client_id in claimed {
            self.emit(WorkerEvent::ControllerChange {
                client_id,
                worker: version.id,
            });
        }
        Ok(())
    }

    async fn worker(&self, id: WorkerId) -> Result<Arc<OfflineWorker>, ServiceWorkerError> {
        self.workers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_not_found(format!("worker {id}"))
            .map_err(ServiceWorkerError::from)
    }

    async fn active_worker(&self) -> Result<Arc<OfflineWorker>, ServiceWorkerError> {
        let id = self
            .active_id()
            .await
            .ok_or_else(|| ServiceWorkerError::State("no active worker".to_string()))?;
        self.worker(id).await
    }

    pub async fn active_id(&self) -> Option<WorkerId> {
        self.registration.read().await.active_id()
    }

    pub async fn waiting_id(&self) -> Option<WorkerId> {
        self.registration.read().await.waiting.as_ref().map(|w| w.id)
    }

    /// Current state of a version, if it is still registered.
    pub async fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.registration.read().await.find(id).map(|w| w.state)
    }

    /// Deliver a page's `postMessage` to a worker version.
    ///
    /// Returns true if the message activated a waiting version.
    pub async fn post_message(&self, target: WorkerId, data: &[u8]) -> Result<bool, ServiceWorkerError> {
        let worker = self.worker(target).await?;
        let Some(ControlMessage::SkipWaiting) = worker.message(data) else {
            return Ok(false);
        };
        if self.waiting_id().await != Some(target) {
            return Ok(false);
        }
        self.registration.write().await.request_skip_waiting();
        self.try_activate().await
    }

    /// Route a page fetch through the active version.
    pub async fn fetch(&self, request: &CacheableRequest) -> Result<FetchOutcome, ServiceWorkerError> {
        match self.active_id().await {
            Some(id) => self.worker(id).await?.fetch(request).await,
            None => Ok(FetchOutcome::NotIntercepted),
        }
    }

    /// Deliver a push message to the active version.
    pub async fn push(&self, data: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        Ok(self.active_worker().await?.push(data).await)
    }

    /// Deliver a notification click to the active version.
    pub async fn notification_click(
        &self,
        click: &NotificationClick,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.active_worker().await?.notification_click(click).await
    }

    /// A page loaded at `url`; it is controlled by the active version.
    pub async fn open_page(&self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.controller = self.active_id().await;
        self.services.clients.write().await.add(client.clone());
        client
    }

    /// A page closed. A waiting version may activate once the old one controls nothing.
    pub async fn close_page(&self, client_id: &str) -> Result<bool, ServiceWorkerError> {
        self.services.clients.write().await.remove(client_id);
        self.try_activate().await
    }
}
