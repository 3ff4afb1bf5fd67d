use crate::cancel::CancelationToken;
use crate::container::{Outcome, Reason};
use crate::error::Error;
use crate::manager::PromiseId;
use crate::node::{NodeCell, NodeRef};
use crate::progress;
use crate::promise::Promise;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// The producer side of a promise.
///
/// A `Deferred` settles its promise at most once. Clones share the same
/// promise; when the last clone is dropped while the promise is still
/// pending, the promise is rejected with [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use promise_chain::{Deferred, Error, Manager};
///
/// let (deferred, promise) = Deferred::<String>::new();
/// promise.then(|text| println!("got {text}")).forget();
///
/// deferred.resolve("hello".into()).unwrap();
/// assert_eq!(deferred.resolve("again".into()), Err(Error::AlreadySettled));
/// Manager::handle_completes();
/// ```
pub struct Deferred<T: 'static> {
    inner: Rc<DeferredInner<T>>,
}

struct DeferredInner<T: 'static> {
    node: NodeRef<T>,
}

impl<T: 'static> Deferred<T> {
    pub fn new() -> (Self, Promise<T>) {
        let node = NodeCell::pending(0);
        let promise = Promise::from_node(Rc::clone(&node));
        (
            Self {
                inner: Rc::new(DeferredInner { node }),
            },
            promise,
        )
    }

    /// A deferred whose promise is canceled when `token` fires first. After
    /// that, resolve and reject attempts fail.
    pub fn with_token(token: &CancelationToken) -> (Self, Promise<T>) {
        let (deferred, promise) = Self::new();
        deferred.inner.node.bind_token(token);
        (deferred, promise)
    }

    pub fn promise_id(&self) -> PromiseId {
        self.inner.node.id()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.node.is_pending()
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.inner.node.settle(Outcome::Resolved(value))
    }

    /// Like [`Deferred::resolve`], but reports a lost race as `false`.
    pub fn try_resolve(&self, value: T) -> bool {
        self.inner.node.try_settle(Outcome::Resolved(value))
    }

    pub fn reject<R: Any + fmt::Debug>(&self, reason: R) -> Result<(), Error> {
        self.reject_with(Reason::new(reason))
    }

    pub fn reject_with(&self, reason: Reason) -> Result<(), Error> {
        self.inner.node.settle(Outcome::Rejected(reason))
    }

    pub fn try_reject<R: Any + fmt::Debug>(&self, reason: R) -> bool {
        self.inner
            .node
            .try_settle(Outcome::Rejected(Reason::new(reason)))
    }

    /// Reports how far the producer is, in [0, 1].
    pub fn report_progress(&self, value: f32) -> Result<(), Error> {
        let value = progress::check_report(value)?;
        if !self.inner.node.is_pending() {
            return Err(Error::AlreadySettled);
        }
        self.inner.node.set_progress(value);
        Ok(())
    }

    pub fn try_report_progress(&self, value: f32) -> bool {
        self.report_progress(value).is_ok()
    }
}

impl<T: 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Drop for DeferredInner<T> {
    fn drop(&mut self) {
        if self.node.is_pending() {
            debug!(promise = %self.node.id(), "deferred dropped while pending");
            self.node
                .try_settle(Outcome::Rejected(Reason::new(Error::ProducerDropped)));
        }
    }
}

impl<T: 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.inner.node.id())
            .field("state", &self.inner.node.state())
            .finish()
    }
}
