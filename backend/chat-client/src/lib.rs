//! Client-resident chat components.
//!
//! - [`ChatSession`]: per-conversation controller driving history, sends and
//!   the realtime channel
//! - [`TypingDebouncer`]: keystroke to `typing` frame translation
//! - [`NotificationBridge`]: OS notifications for messages arriving unfocused
//! - [`UnreadBadge`]: periodically refreshed unread total
//!
//! Transport sits behind [`ChatApi`] and [`RealtimeConnector`]; the HTTP and
//! WebSocket implementations talk to `chat-service`.

pub mod api;
pub mod badge;
pub mod error;
pub mod notify;
pub mod session;
pub mod transport;
pub mod typing;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use api::{ChatApi, HttpChatApi};
pub use badge::UnreadBadge;
pub use error::{ClientError, ClientResult};
pub use notify::{Notification, NotificationBridge, Notifier, NotifyError, TracingNotifier};
pub use session::{ChatSession, ComposeState, Phase, RemotePresence, SessionSnapshot};
pub use transport::{RealtimeConnection, RealtimeConnector, WsConnector};
pub use typing::TypingDebouncer;
