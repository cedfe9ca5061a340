//! The per-version event dispatcher.
//!
//! An [`OfflineWorker`] is what the worker script is: one handler per event,
//! all state injected. The host decides when each handler runs.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStorage;
use crate::clients::{Clients, WindowAction};
use crate::config::WorkerConfig;
use crate::lifecycle::WorkerId;
use crate::push::{Notification, NotificationOptions, Notifications, PushPayload, ACTION_CLOSE};
use crate::request::{CacheableRequest, CacheableResponse, Fetcher};
use crate::router::{FetchOutcome, FetchRouter};
use crate::ServiceWorkerError;

/// Platform resources shared by every worker version of the registration.
#[derive(Clone)]
pub struct WorkerServices {
    pub caches: Arc<RwLock<CacheStorage>>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: Arc<RwLock<Notifications>>,
}

impl WorkerServices {
    /// Fresh, empty platform state around a network implementation.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_caches(fetcher, CacheStorage::new())
    }

    /// Platform state starting from existing cache storage.
    pub fn with_caches(fetcher: Arc<dyn Fetcher>, caches: CacheStorage) -> Self {
        Self {
            caches: Arc::new(RwLock::new(caches)),
            fetcher,
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Notifications::new())),
        }
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// The version asked to skip the waiting hold.
    pub skip_waiting: bool,
    /// Number of assets written to the static store.
    pub cached: usize,
}

/// Message posted by a controlled page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl ControlMessage {
    /// Decode a posted message. Anything unrecognised is `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// A click on a displayed notification.
#[derive(Debug, Clone)]
pub struct NotificationClick {
    pub notification: Notification,
    /// `open`, `close`, or `None` for a click on the notification body.
    pub action: Option<String>,
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Notification dismissed, nothing opened or focused.
    Dismissed,
    /// Notification dismissed and a window focused or opened.
    Window(WindowAction),
}

/// Event handlers of one worker version.
pub struct OfflineWorker {
    id: WorkerId,
    config: Arc<WorkerConfig>,
    services: WorkerServices,
    router: FetchRouter,
}

impl OfflineWorker {
    /// Build the dispatcher for version `id`.
    pub fn new(
        id: WorkerId,
        config: Arc<WorkerConfig>,
        services: WorkerServices,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let router = FetchRouter::new(
            Arc::clone(&config),
            Arc::clone(&services.caches),
            Arc::clone(&services.fetcher),
        )?;
        Ok(Self {
            id,
            config,
            services,
            router,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn services(&self) -> &WorkerServices {
        &self.services
    }

    /// Install: populate the static store with every asset, or with nothing.
    #[instrument(skip(self), fields(worker = %self.id, generation = %self.config.static_cache))]
    pub async fn install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        let urls = self.config.resolve_static_assets()?;

        let fetched = try_join_all(urls.into_iter().map(|url| async move {
            let request = CacheableRequest::get(url);
            let response = self.services.fetcher.fetch(&request).await.map_err(|e| {
                ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok::<(CacheableRequest, CacheableResponse), ServiceWorkerError>((request, response))
        }))
        .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "Install failed, static store left untouched");
                return Err(e);
            }
        };

        let mut caches = self.services.caches.write().await;
        let cache = caches.open(&self.config.static_cache);
        for (request, response) in &fetched {
            cache.put(request, response);
        }
        info!(assets = fetched.len(), "Static store populated");

        Ok(InstallOutcome {
            skip_waiting: self.config.skip_waiting_on_install,
            cached: fetched.len(),
        })
    }

    /// Activate: drop stale generations, make sure the runtime store exists and
    /// claim open pages.
    ///
    /// Returns the IDs of clients that switched to this version.
    #[instrument(skip(self), fields(worker = %self.id))]
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        {
            let mut caches = self.services.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| *name != self.config.static_cache && *name != self.config.runtime_cache)
                .map(str::to_string)
                .collect();
            for name in stale {
                caches.delete(&name);
                info!(cache = %name, "Deleted stale cache");
            }
            caches.open(&self.config.runtime_cache);
        }

        let origin = self.config.origin.origin();
        let claimed = self.services.clients.write().await.claim(&origin, self.id);
        debug!(claimed = claimed.len(), "Claimed clients");
        Ok(claimed)
    }

    /// Fetch: route the request to a caching strategy.
    pub async fn fetch(&self, request: &CacheableRequest) -> Result<FetchOutcome, ServiceWorkerError> {
        self.router.handle(request).await
    }

    /// Message from a controlled page.
    pub fn message(&self, data: &[u8]) -> Option<ControlMessage> {
        let message = ControlMessage::decode(data);
        match message {
            Some(ControlMessage::SkipWaiting) => debug!(worker = %self.id, "SKIP_WAITING received"),
            None => debug!(worker = %self.id, "Ignoring unrecognised message"),
        }
        message
    }

    /// Push: show a notification built from the payload.
    pub async fn push(&self, data: Option<&[u8]>) -> Notification {
        let payload = PushPayload::decode(data);
        let defaults = &self.config.notifications;
        let title = payload.title.clone().unwrap_or_else(|| defaults.title.clone());
        let options = NotificationOptions::from_payload(&payload, defaults);

        let notification = self.services.notifications.write().await.show(title, options);
        info!(
            worker = %self.id,
            tag = %notification.options.tag,
            url = %notification.target_url(),
            "Notification shown"
        );
        notification
    }

    /// Notification click: dismiss, then focus or open the target page unless `close`.
    pub async fn notification_click(
        &self,
        click: &NotificationClick,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.services
            .notifications
            .write()
            .await
            .close(click.notification.id);

        if click.action.as_deref() == Some(ACTION_CLOSE) {
            debug!(worker = %self.id, "Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let target = match click.notification.target_url() {
            "" => self.config.notifications.url.as_str(),
            url => url,
        };
        let target = self.config.resolve(target)?;
        let action = self.services.clients.write().await.focus_or_open(&target)?;
        info!(worker = %self.id, ?action, "Notification click routed");
        Ok(ClickOutcome::Window(action))
    }
}
