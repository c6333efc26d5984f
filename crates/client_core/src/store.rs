//! Process-wide client state that several views consume: the wallet
//! balance and the notification list. Both are mutated only by re-fetching
//! from the server; no consumer ever computes a new balance locally.

use std::sync::Mutex;

use shared::{
    domain::{NotificationId, NotificationStatus, Role, UserId},
    protocol::Notification,
};
use tokio::sync::watch;

/// Explicit store with a defined update channel, replacing the original's
/// ambient context reads. Consumers either read the current value or watch
/// for changes.
pub struct Store {
    balance: watch::Sender<Option<i64>>,
    notifications: watch::Sender<Vec<Notification>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (balance, _) = watch::channel(None);
        let (notifications, _) = watch::channel(Vec::new());
        Self {
            balance,
            notifications,
        }
    }

    /// Last fetched wallet balance, `None` until the first refresh.
    pub fn balance(&self) -> Option<i64> {
        *self.balance.borrow()
    }

    pub fn watch_balance(&self) -> watch::Receiver<Option<i64>> {
        self.balance.subscribe()
    }

    pub(crate) fn set_balance(&self, balance: i64) {
        self.balance.send_replace(Some(balance));
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    pub fn watch_notifications(&self) -> watch::Receiver<Vec<Notification>> {
        self.notifications.subscribe()
    }

    pub(crate) fn set_notifications(&self, notifications: Vec<Notification>) {
        self.notifications.send_replace(notifications);
    }

    /// Whether the given notification is already known to be read.
    /// `None` when the notification is not in the store at all.
    pub fn notification_is_read(&self, id: &NotificationId) -> Option<bool> {
        self.notifications
            .borrow()
            .iter()
            .find(|n| &n.id == id)
            .map(|n| n.status == NotificationStatus::Read)
    }

    /// Flips a notification to Read locally. Returns false when it was
    /// already read or unknown, so callers can skip the redundant call.
    pub(crate) fn mark_notification_read(&self, id: &NotificationId) -> bool {
        let mut changed = false;
        self.notifications.send_if_modified(|list| {
            for notification in list.iter_mut() {
                if &notification.id == id && notification.status == NotificationStatus::Unread {
                    notification.status = NotificationStatus::Read;
                    changed = true;
                    return true;
                }
            }
            false
        });
        changed
    }
}

/// A signed-in identity plus the bearer token attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
}

/// Seam for token persistence. The application decides where sessions
/// live; tests inject an in-memory fake instead of mocking real storage.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<PersistedSession>;
    fn save(&self, session: &PersistedSession);
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<PersistedSession>>,
}

impl SessionStore for InMemorySessionStore {
    fn load(&self) -> Option<PersistedSession> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, session: &PersistedSession) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session.clone());
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
    }
}
