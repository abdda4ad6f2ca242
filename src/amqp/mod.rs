//! The [`lapin`] implementation of the [`broker`](crate::broker) interface, plus
//! ready-made bootstrap actions to declare exchanges, queues and bindings.

pub mod bootstrap;
pub mod configuration;
mod factory;
pub use factory::{AmqpConnection, ConnectionFactory, LapinBroker};
pub use lapin::{Channel, Connection};

pub use lapin::{options, types, ExchangeKind};
