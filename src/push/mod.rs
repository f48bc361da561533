//! Push notifications: message building and endpoint delivery.

pub mod delivery;
pub mod message;

pub use delivery::{DEFAULT_RETRY_AFTER, DeliveryOutcome, PushTransport, WebPushTransport};
pub use message::{Notification, NotificationBuilder, NotificationData, PushMessage};
