//! Push payload decoding and the notification registry.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::config::NotificationDefaults;

/// Action id that opens (or focuses) the target page.
pub const ACTION_OPEN: &str = "open";

/// Action id that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

/// Decoded push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub tag: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Decode raw push data.
    ///
    /// Absent data, invalid JSON or a non-object all decode to an empty payload.
    /// Fields that are not non-empty strings are treated as absent.
    pub fn decode(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        let value: JsonValue = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Push data is not JSON, using defaults");
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            debug!("Push data is not a JSON object, using defaults");
            return Self::default();
        };
        let field = |name: &str| {
            object
                .get(name)
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            title: field("title"),
            body: field("body"),
            icon: field("icon"),
            image: field("image"),
            tag: field("tag"),
            url: field("url"),
        }
    }
}

/// A button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Opaque data carried by a notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page to open or focus on click.
    pub url: String,
    /// When the notification was built.
    pub date: DateTime<Utc>,
}

/// Display options of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub image: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl NotificationOptions {
    /// Build display options from a payload, falling back to `defaults` field by field.
    pub fn from_payload(payload: &PushPayload, defaults: &NotificationDefaults) -> Self {
        let or_default =
            |value: &Option<String>, fallback: &str| value.clone().unwrap_or_else(|| fallback.to_string());

        Self {
            body: or_default(&payload.body, &defaults.body),
            icon: or_default(&payload.icon, &defaults.icon),
            badge: defaults.badge.clone(),
            image: or_default(&payload.image, &defaults.image),
            vibrate: defaults.vibrate.clone(),
            tag: or_default(&payload.tag, &defaults.tag),
            require_interaction: false,
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: defaults.open_action_title.clone(),
                    icon: Some(defaults.icon.clone()),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: defaults.close_action_title.clone(),
                    icon: None,
                },
            ],
            data: NotificationData {
                url: or_default(&payload.url, &defaults.url),
                date: Utc::now(),
            },
        }
    }
}

/// Unique identifier for a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A notification on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// Target URL stored in the notification data.
    pub fn target_url(&self) -> &str {
        &self.options.data.url
    }
}

/// Notifications currently displayed for the registration.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: Vec<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification. One with the same tag is replaced.
    pub fn show(&mut self, title: impl Into<String>, options: NotificationOptions) -> Notification {
        let notification = Notification {
            id: NotificationId::new(),
            title: title.into(),
            options,
        };
        let tag = notification.options.tag.clone();
        let before = self.shown.len();
        self.shown.retain(|n| n.options.tag != tag);
        if self.shown.len() != before {
            trace!(tag = %tag, "Replacing notification with same tag");
        }
        self.shown.push(notification.clone());
        notification
    }

    /// Dismiss a notification. Returns false if it was not displayed.
    pub fn close(&mut self, id: NotificationId) -> bool {
        let before = self.shown.len();
        self.shown.retain(|n| n.id != id);
        before != self.shown.len()
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }
}
