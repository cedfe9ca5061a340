//! # Ipoteka Krym offline worker
//!
//! Offline caching and push notifications for the Ipoteka Krym site, written
//! as a service worker with every platform dependency injected.
//!
//! ## Features
//!
//! - **Lifecycle**: install populates a versioned static store all-or-nothing,
//!   activate deletes stale generations and claims open pages
//! - **Fetch routing**: cache-first for same-origin assets, network-first with
//!   offline fallback for the remote API and CDN hosts
//! - **Push**: defensive payload decoding into a notification with `open`/`close` actions
//! - **Notification clicks**: focus an open window at the target URL or open one
//! - **Control channel**: `{type: "SKIP_WAITING"}` promotes a waiting version
//!
//! ## Architecture
//!
//! ```text
//! WorkerHost (platform: registration, events)
//!     │
//!     ├── Registration ── installing / waiting / active WorkerVersion
//!     │
//!     └── OfflineWorker (one per version)
//!             ├── WorkerConfig (immutable)
//!             ├── FetchRouter ── Fetcher (network seam)
//!             └── WorkerServices
//!                     ├── CacheStorage ── Cache ── CacheEntry
//!                     ├── Clients
//!                     └── Notifications
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod host;
pub mod lifecycle;
pub mod push;
pub mod request;
pub mod router;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, ClientMatchOptions, Clients, WindowAction};
pub use config::{NotificationDefaults, WorkerConfig};
pub use host::{WorkerEvent, WorkerHost};
pub use lifecycle::{Registration, WorkerId, WorkerState, WorkerVersion};
pub use push::{Notification, NotificationId, NotificationOptions, Notifications, PushPayload};
pub use request::{CacheableRequest, CacheableResponse, FetchError, Fetcher, ResponseType};
pub use router::{FetchOutcome, FetchRouter, Strategy};
pub use worker::{
    ClickOutcome, ControlMessage, InstallOutcome, NotificationClick, OfflineWorker, WorkerServices,
};

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed: {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error(transparent)]
    Network(#[from] FetchError),

    #[error("State error: {0}")]
    State(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Common(#[from] ipoteka_common::IpotekaError),
}
