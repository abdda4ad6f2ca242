use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::broker::Broker;
use crate::pool::ModelPool;
use crate::Error;

/// A model borrowed from a [`ModelPool`] that goes back to the pool when dropped.
///
/// Do not close the underlying model yourself: give it back by letting `PooledModel` go out of
/// scope. The pool checks the model's health and either keeps it for the next borrower or
/// discards it.
///
/// The model is given back exactly once, whether the scope ends normally, with an early return
/// or while unwinding.
pub struct PooledModel<B: Broker> {
    model: Option<B::Model>,
    pool: ModelPool<B>,
}

impl<B: Broker> PooledModel<B> {
    pub(crate) fn new(model: B::Model, pool: ModelPool<B>) -> Self {
        Self {
            model: Some(model),
            pool,
        }
    }

    /// The pool this model will be given back to.
    pub fn pool(&self) -> &ModelPool<B> {
        &self.pool
    }
}

impl<B: Broker> Deref for PooledModel<B> {
    type Target = B::Model;

    fn deref(&self) -> &Self::Target {
        self.model.as_ref().expect("Model already given back")
    }
}

impl<B: Broker> DerefMut for PooledModel<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.model.as_mut().expect("Model already given back")
    }
}

impl<B: Broker> Drop for PooledModel<B> {
    fn drop(&mut self) {
        self.pool.release(self.model.take());
    }
}

impl<B: Broker> fmt::Debug for PooledModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledModel")
            .field("model", self.pool.model_id())
            .finish()
    }
}

/// A scoped model that is only borrowed from its [`ModelPool`] the first time it is accessed.
///
/// If it was never accessed, nothing is borrowed and nothing is given back.
/// Otherwise the model goes back to the pool when `LazyModel` is dropped, like [`PooledModel`].
pub struct LazyModel<B: Broker> {
    pool: ModelPool<B>,
    model: Option<PooledModel<B>>,
}

impl<B: Broker> LazyModel<B> {
    pub(crate) fn new(pool: ModelPool<B>) -> Self {
        Self { pool, model: None }
    }

    /// Borrow the model on first access, then keep handing out the same one.
    ///
    /// If borrowing fails, the next call tries again.
    pub async fn get(&mut self) -> Result<&B::Model, Error> {
        let model = match self.model.take() {
            Some(model) => model,
            None => self.pool.get().await?,
        };
        Ok(&**self.model.insert(model))
    }

    /// Has the model been borrowed yet?
    pub fn is_borrowed(&self) -> bool {
        self.model.is_some()
    }
}

impl<B: Broker> fmt::Debug for LazyModel<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyModel")
            .field("model", self.pool.model_id())
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}
