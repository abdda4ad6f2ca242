//! `warren` manages the lifecycle of RabbitMq connections and channels, built on top of [`lapin`].
//!
//! Application code asks for a ready-to-use channel (a "model") by name; `warren` takes care of
//! the rest:
//! - one shared connection per registered [`ConnectionId`], opened lazily on first use;
//! - channels opened on demand against that connection and bootstrapped once (e.g. declaring
//!   the exchanges and queues they rely on);
//! - channels given back to a per-[`ModelId`] pool after use instead of being closed, and
//!   discarded if they broke in the meantime;
//! - connection and channel lifecycle events surfaced as structured [`tracing`] events.
//!
//! [`Warren`] is the best starting point to learn more about what `warren` provides and how
//! to leverage it.

pub mod amqp;
pub mod broker;
pub mod connection;
pub mod events;
pub mod model;
pub mod pool;

mod error;
mod identity;
mod manager;

pub use error::Error;
pub use identity::{ConnectionId, ModelId};
pub use manager::{Warren, WarrenBuilder};
pub use pool::{LazyModel, ModelPool, PoolSettings, PoolStatus, PooledModel};
