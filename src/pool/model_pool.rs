use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use serde::Deserialize;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::broker::{Broker, HealthStatus, Model};
use crate::events::{EventBridge, LifecycleEvent};
use crate::identity::ModelId;
use crate::model::ModelFactory;
use crate::pool::{LazyModel, PooledModel};
use crate::Error;

#[derive(Debug, Default, Deserialize, Clone)]
/// Configuration of a [`ModelPool`].
pub struct PoolSettings {
    /// Maximum number of models that can be borrowed at the same time.
    ///
    /// When the ceiling is reached, [`ModelPool::borrow`] waits until a model is given back.
    /// If left unspecified, the pool grows without bounds and borrowing never waits.
    #[serde(default)]
    pub max_outstanding: Option<usize>,
}

/// A snapshot of the state of a [`ModelPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Models waiting in the pool to be borrowed.
    pub idle: usize,
    /// Models currently borrowed.
    pub outstanding: usize,
}

/// `ModelPool` hands out models for a single [`ModelId`].
///
/// Borrowing pops an idle model if there is a healthy one, otherwise a new model is created
/// (and bootstrapped) by the [`ModelFactory`]. Giving a model back pushes it onto the idle set
/// if it is still healthy, or discards it otherwise.
///
/// Idle models are handed out in no particular order.
/// `ModelPool` is cheap to clone: all clones share the same idle set.
pub struct ModelPool<B: Broker> {
    inner: Arc<Inner<B>>,
}

struct Inner<B: Broker> {
    model: ModelId,
    factory: Arc<ModelFactory<B>>,
    idle: SegQueue<B::Model>,
    outstanding: AtomicUsize,
    /// `None` if the pool is unbounded.
    capacity: Option<Semaphore>,
    closed: AtomicBool,
    events: EventBridge,
}

impl<B: Broker> Clone for ModelPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broker> ModelPool<B> {
    pub(crate) fn new(
        model: ModelId,
        factory: Arc<ModelFactory<B>>,
        settings: &PoolSettings,
        events: EventBridge,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                model,
                factory,
                idle: SegQueue::new(),
                outstanding: AtomicUsize::new(0),
                capacity: settings.max_outstanding.map(Semaphore::new),
                closed: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// The model this pool hands out.
    pub fn model_id(&self) -> &ModelId {
        &self.inner.model
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.idle.len(),
            outstanding: self.inner.outstanding.load(Ordering::SeqCst),
        }
    }

    /// Borrow a model from the pool.
    ///
    /// The model must be given back with [`ModelPool::release`], or it will count as
    /// outstanding forever. Prefer [`ModelPool::get`] unless you need to manage the model
    /// lifetime by hand.
    ///
    /// Fails if a new model is needed and it cannot be created: connection failure, channel
    /// failure or bootstrap failure.
    pub async fn borrow(&self) -> Result<B::Model, Error> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed(self.inner.model.clone()));
        }
        let permit = match &self.inner.capacity {
            Some(capacity) => Some(
                capacity
                    .acquire()
                    .await
                    .map_err(|_| Error::PoolClosed(self.inner.model.clone()))?,
            ),
            None => None,
        };

        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        // Undoes the accounting if creation fails or the caller stops polling this future.
        let pending = PendingBorrow {
            pool: self,
            permit,
            armed: true,
        };
        let model = self.take_or_create().await?;
        pending.complete();
        Ok(model)
    }

    async fn take_or_create(&self) -> Result<B::Model, Error> {
        while let Some(model) = self.inner.idle.pop() {
            if model.status() == HealthStatus::Healthy {
                return Ok(model);
            }
            tracing::debug!(model = %self.inner.model, "Discarding a model that broke while idle");
        }
        self.inner.factory.create_model(&self.inner.model).await
    }

    /// Give a borrowed model back to the pool.
    ///
    /// Healthy models are kept for the next borrower; unhealthy ones are discarded.
    /// Passing `None` (e.g. after a failed borrow) does nothing.
    pub fn release(&self, model: Option<B::Model>) {
        let Some(model) = model else {
            return;
        };

        let returned = !self.inner.closed.load(Ordering::SeqCst)
            && model.status() == HealthStatus::Healthy;
        if returned {
            self.inner.idle.push(model);
            // `close` may have drained the idle set between the check above and the push.
            if self.inner.closed.load(Ordering::SeqCst) {
                self.drain_idle();
            }
        } else {
            discard(model);
        }
        self.settle();

        self.inner.events.emit(LifecycleEvent::ModelReturned {
            model: self.inner.model.clone(),
            returned,
        });
    }

    /// A borrow is over, whatever its outcome.
    fn settle(&self) {
        if let (true, Some(capacity)) = (self.untrack(), &self.inner.capacity) {
            capacity.add_permits(1);
        }
    }

    fn untrack(&self) -> bool {
        // A model that was never borrowed from this pool must not drive the count below zero.
        self.inner
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Hand every idle model over to [`discard`].
    fn drain_idle(&self) {
        while let Some(model) = self.inner.idle.pop() {
            discard(model);
        }
    }

    /// Borrow a model that goes back to the pool when dropped.
    pub async fn get(&self) -> Result<PooledModel<B>, Error> {
        let model = self.borrow().await?;
        Ok(PooledModel::new(model, self.clone()))
    }

    /// A [`LazyModel`]: the model is only borrowed the first time it is accessed.
    pub fn lazy(&self) -> LazyModel<B> {
        LazyModel::new(self.clone())
    }

    /// Close every idle model and stop handing out new ones.
    ///
    /// Models still borrowed are discarded when they are given back.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(capacity) = &self.inner.capacity {
            capacity.close();
        }
        while let Some(model) = self.inner.idle.pop() {
            if let Err(e) = model.close().await {
                tracing::debug!(model = %self.inner.model, error = ?e, "Failed to close idle model");
            }
        }
    }
}

/// The bookkeeping of a borrow that has not produced a model yet.
///
/// Dropping it gives the ceiling permit back and stops counting the borrow as outstanding.
struct PendingBorrow<'a, B: Broker> {
    pool: &'a ModelPool<B>,
    permit: Option<SemaphorePermit<'a>>,
    armed: bool,
}

impl<B: Broker> PendingBorrow<'_, B> {
    /// The model was handed out: its permit is given back by [`ModelPool::release`].
    fn complete(mut self) {
        self.armed = false;
        if let Some(permit) = self.permit.take() {
            permit.forget();
        }
    }
}

impl<B: Broker> Drop for PendingBorrow<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.untrack();
        }
    }
}

/// Drop a model that is not going back to the pool.
///
/// Broken models are just dropped; healthy ones (the pool was closed) are closed in the background.
fn discard<M: Model>(model: M) {
    if model.status() == HealthStatus::Unhealthy {
        return;
    }
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if let Err(e) = model.close().await {
                tracing::debug!(error = ?e, "Failed to close discarded model");
            }
        });
    }
}
