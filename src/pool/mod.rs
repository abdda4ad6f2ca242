//! Pooling of models (channels), one pool per registered [`ModelId`](crate::ModelId).
//!
//! This module provides two key guarantees:
//! - Models are bootstrapped once and reused across many borrows, instead of being
//!   re-opened for every operation.
//! - Broken models are discarded when they are given back, and new ones are created on-demand.
//!
//! Models can be consumed in two ways:
//! - manually, through [`ModelPool::borrow`] and [`ModelPool::release`];
//! - scoped, through [`PooledModel`] (or [`LazyModel`]), which goes back to the pool when
//!   it is dropped.
//!
//! ```rust,no_run
//! use warren::amqp::bootstrap::DeclareExchange;
//! use warren::amqp::configuration::ConnectionSettings;
//! use warren::amqp::{ExchangeKind, LapinBroker};
//! use warren::Warren;
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     let warren = Warren::builder(LapinBroker)
//!         .connection("C1", || Ok(ConnectionSettings::default()))
//!         .model("Exc1", "C1", DeclareExchange::durable("myExc", ExchangeKind::Topic))
//!         .build()?;
//!
//!     // scoped: the channel goes back to the pool at the end of the block.
//!     {
//!         let channel = warren.get("Exc1").await?;
//!         channel
//!             .basic_publish(
//!                 "myExc",
//!                 "some.routing.key",
//!                 Default::default(),
//!                 b"payload",
//!                 Default::default(),
//!             )
//!             .await?;
//!     }
//!
//!     // manual: borrow and give back.
//!     let pool = warren.pool("Exc1")?;
//!     let channel = pool.borrow().await?;
//!     pool.release(Some(channel));
//!     Ok(())
//! }
//! ```

mod model_pool;
mod pooled;

pub use model_pool::{ModelPool, PoolSettings, PoolStatus};
pub use pooled::{LazyModel, PooledModel};
