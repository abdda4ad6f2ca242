//! Creating and bootstrapping models (channels).
mod bootstrap;
mod factory;

pub use bootstrap::{Bootstrap, NoBootstrap};
pub use factory::{ModelBinding, ModelFactory};
