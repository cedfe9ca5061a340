//! Clients API: the windows open on the origin.

use hashbrown::HashMap;
use ipoteka_common::OptionExt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use url::Url;

use crate::lifecycle::WorkerId;
use crate::ServiceWorkerError;

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A window client of the origin.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker version controlling this client, if any.
    pub controller: Option<WorkerId>,
}

impl Client {
    /// A visible, uncontrolled window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }

    /// Focus the window.
    pub fn focus(&mut self) {
        self.focused = true;
        self.visibility_state = VisibilityState::Visible;
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by `controller`.
    pub include_uncontrolled: bool,
    /// Worker asking; only its clients match unless `include_uncontrolled`.
    pub controller: Option<WorkerId>,
}

/// What happened to the window set after a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAction {
    /// An existing window at the target URL was focused.
    Focused { client_id: String },
    /// A new window was opened at the target URL.
    Opened { client_id: String, url: Url },
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
    order: Vec<String>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match clients, oldest first.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        self.order
            .iter()
            .filter_map(|id| self.clients.get(id))
            .filter(|c| options.include_uncontrolled || c.controller == options.controller)
            .collect()
    }

    /// Open a new window and focus it.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        client.focused = true;
        debug!(client = %client.id, url = %client.url, "Opening window");
        self.add(client.clone());
        client
    }

    /// Focus a window, unfocusing every other.
    pub fn focus(&mut self, id: &str) -> Result<(), ServiceWorkerError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_not_found(format!("client {id}"))?;
        client.focus();
        for (other_id, other) in self.clients.iter_mut() {
            if other_id != id {
                other.focused = false;
            }
        }
        Ok(())
    }

    /// Take control of every client on `origin`. Returns the IDs whose controller changed.
    pub fn claim(&mut self, origin: &url::Origin, worker: WorkerId) -> Vec<String> {
        let mut changed = Vec::new();
        for id in &self.order {
            if let Some(client) = self.clients.get_mut(id) {
                if &client.url.origin() == origin && client.controller != Some(worker) {
                    client.controller = Some(worker);
                    changed.push(id.clone());
                }
            }
        }
        changed
    }

    /// Number of clients controlled by `worker`.
    pub fn controlled_by(&self, worker: WorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Focus a window whose URL equals `target`, or open one.
    pub fn focus_or_open(&mut self, target: &Url) -> Result<WindowAction, ServiceWorkerError> {
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            controller: None,
        };
        let existing = self
            .match_all(&options)
            .into_iter()
            .find(|c| &c.url == target)
            .map(|c| c.id.clone());

        match existing {
            Some(client_id) => {
                self.focus(&client_id)?;
                Ok(WindowAction::Focused { client_id })
            }
            None => {
                let client = self.open_window(target.clone());
                Ok(WindowAction::Opened {
                    client_id: client.id,
                    url: client.url,
                })
            }
        }
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        if !self.clients.contains_key(&client.id) {
            self.order.push(client.id.clone());
        }
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.order.retain(|o| o != id);
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
