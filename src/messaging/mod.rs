//! Cross-process cache invalidation.
//!
//! A [`MessagingService`] wraps one transport ([`Messenger`]) obtained from a
//! [`MessengerProvider`]. Outgoing changes are announced as small JSON
//! envelopes; incoming envelopes are de-duplicated by id and handed to an
//! [`IncomingMessageHandler`], normally the engine.

pub mod buffer;
pub mod local;
pub mod message;
pub mod recent;
pub mod registry;
pub mod service;
pub mod sql;
pub mod supervise;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
#[cfg(feature = "redis")]
pub mod redis;

pub use buffer::BufferedRequest;
pub use local::{LocalBus, LocalMessenger, LocalMessengerProvider};
pub use message::{ActionLogEntry, Message, RawEnvelope};
pub use recent::RecentIds;
pub use registry::MessengerRegistry;
pub use service::MessagingService;
pub use sql::{MessageTable, SqlMessenger, SqlMessengerProvider, SqliteMessageTable};
pub use traits::{
    CustomMessageListener, IncomingMessageConsumer, IncomingMessageHandler, Messenger,
    MessengerContext, MessengerProvider,
};
