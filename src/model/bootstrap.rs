use std::ops::Deref;
use std::sync::Arc;

use crate::broker::Model;

#[async_trait::async_trait]
/// Setup logic executed against every newly created model, before it is handed out.
///
/// # Use case
///
/// A model is usually bound to a purpose: publishing to a given exchange, consuming from a
/// given queue. Who is in charge of declaring those objects on the broker?
///
/// A bootstrap action runs exactly once per model, right after the channel is opened, which
/// makes it the natural place to declare exchanges, queues and bindings.
/// Models recycled by the pool are **not** bootstrapped again.
///
/// If `run` fails, the model is closed and discarded: it never reaches the pool nor the caller.
///
/// Check out [`crate::amqp::bootstrap`] for ready-made actions against [`lapin::Channel`].
pub trait Bootstrap<M: Model>: Send + Sync + 'static {
    async fn run(&self, model: &M) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn Bootstrap<lapin::Channel>>;

/// A bootstrap action that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBootstrap;

#[async_trait::async_trait]
impl<M: Model> Bootstrap<M> for NoBootstrap {
    async fn run(&self, _model: &M) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<M: Model, B: Bootstrap<M> + ?Sized> Bootstrap<M> for Arc<B> {
    async fn run(&self, model: &M) -> Result<(), anyhow::Error> {
        self.deref().run(model).await
    }
}

/// Runs every action in order, stopping at the first failure.
#[async_trait::async_trait]
impl<M: Model, B: Bootstrap<M>> Bootstrap<M> for Vec<B> {
    async fn run(&self, model: &M) -> Result<(), anyhow::Error> {
        for action in self {
            action.run(model).await?;
        }
        Ok(())
    }
}
