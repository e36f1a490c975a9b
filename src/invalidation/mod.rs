//! Push-driven cache invalidation.
//!
//! - [`bus`]: applies push messages to the cache and coalesces refreshes
//! - [`messages`]: push message and notice types
//! - [`subscription`]: listener registry with disposable handles
//! - [`transport`]: WebSocket and in-process push transports

pub mod bus;
pub mod messages;
pub mod subscription;
pub mod transport;

pub use bus::{InvalidationBus, RefreshTarget};
pub use messages::{InvalidationEvent, InvalidationNotice, PushMessage};
pub use subscription::Subscription;
