//! Bridge from incoming chat messages to OS notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chat_schema::MessageView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Platform notification sink. Delivery is best-effort.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
    fn play_sound(&self) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used where no platform sink exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(title = %notification.title, body = %notification.body, "notification");
        Ok(())
    }

    fn play_sound(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifies for messages that arrive while the app is not focused.
#[derive(Clone)]
pub struct NotificationBridge {
    notifier: Arc<dyn Notifier>,
    focused: Arc<AtomicBool>,
}

impl NotificationBridge {
    /// Starts out focused.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            focused: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Relaxed);
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Relaxed)
    }

    /// Returns whether a notification was attempted. Failures are swallowed.
    pub fn message_received(&self, view: &MessageView) -> bool {
        if self.is_focused() {
            return false;
        }
        let notification = Notification {
            title: view.sender.name.clone(),
            body: view.message.body.preview(),
            icon: view.sender.avatar_url.clone(),
        };
        if let Err(e) = self.notifier.notify(&notification) {
            tracing::debug!(error = %e, "notification not shown");
        }
        if let Err(e) = self.notifier.play_sound() {
            tracing::debug!(error = %e, "notification sound not played");
        }
        true
    }
}
