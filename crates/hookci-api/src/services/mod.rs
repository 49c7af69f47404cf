//! Services used by the API server.

pub mod notify;

pub use notify::{Notification, NotifyError, WebhookNotifier};
