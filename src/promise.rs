//! Consumer-side promise handles.
//!
//! A [`Promise`] is a single-use handle: every consuming method takes it by
//! value, so exactly one `then`, `catch`, await or [`Promise::forget`] can
//! observe it. [`Promise::preserve`] turns it into a [`PreservedPromise`],
//! which hands out any number of independent handles.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Deferred, Manager};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let (deferred, promise) = Deferred::<i32>::new();
//! let seen = Rc::new(Cell::new(0));
//! let sink = Rc::clone(&seen);
//! promise.then(|value| value * 2).then(move |value| sink.set(value)).forget();
//!
//! deferred.resolve(21).unwrap();
//! assert_eq!(seen.get(), 0);
//! Manager::handle_completes();
//! assert_eq!(seen.get(), 42);
//! ```

use crate::cancel::CancelationToken;
use crate::chain::{self, OnResolved, Reaction};
use crate::container::{CancelReason, Outcome, Reason, State};
use crate::manager::{self, PromiseId};
use crate::node::{NodeCell, NodeRef};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// What a handler wants its child promise to become.
pub enum Flow<T> {
    Resolve(T),
    /// Settle the child the same way as this promise, once it settles.
    Adopt(Promise<T>),
    Reject(Reason),
    Cancel(CancelReason),
    /// Re-raise the rejection or cancelation being handled. Returned from a
    /// resolve handler, it rejects the child with
    /// [`Error::RethrowOutsideHandler`](crate::Error::RethrowOutsideHandler).
    Rethrow,
}

impl<T> Flow<T> {
    pub fn reject<R: Any + fmt::Debug>(reason: R) -> Self {
        Flow::Reject(Reason::new(reason))
    }

    pub fn cancel<R: Any + fmt::Debug>(reason: R) -> Self {
        Flow::Cancel(CancelReason::new(reason))
    }

    pub fn canceled() -> Self {
        Flow::Cancel(CancelReason::none())
    }
}

impl<T> From<Outcome<T>> for Flow<T> {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Resolved(value) => Flow::Resolve(value),
            Outcome::Rejected(reason) => Flow::Reject(reason),
            Outcome::Canceled(reason) => Flow::Cancel(reason),
        }
    }
}

impl<T> From<Promise<T>> for Flow<T> {
    fn from(promise: Promise<T>) -> Self {
        Flow::Adopt(promise)
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Resolve(_) => write!(f, "Resolve(..)"),
            Flow::Adopt(promise) => write!(f, "Adopt({})", promise.node.id()),
            Flow::Reject(reason) => write!(f, "Reject({reason})"),
            Flow::Cancel(reason) => write!(f, "Cancel({reason})"),
            Flow::Rethrow => write!(f, "Rethrow"),
        }
    }
}

/// A single-consumption handle on an eventual value.
///
/// Dropping a handle without consuming or forgetting it releases it as
/// well, but counts as a leak when validation is on.
#[must_use = "a promise must be consumed or forgotten"]
pub struct Promise<T> {
    node: NodeRef<T>,
    consumed: bool,
}

impl<T: 'static> Promise<T> {
    pub(crate) fn from_node(node: NodeRef<T>) -> Self {
        node.acquire_handle();
        Self {
            node,
            consumed: false,
        }
    }

    /// Gives up the handle without touching the node's counters.
    fn into_node(mut self) -> NodeRef<T> {
        self.consumed = true;
        Rc::clone(&self.node)
    }

    /// Gives up the handle as an observer. The caller must subscribe.
    pub(crate) fn consume(self) -> NodeRef<T> {
        let node = self.into_node();
        node.mark_consumed();
        node
    }

    pub(crate) fn depth(&self) -> u32 {
        self.node.depth()
    }

    pub fn resolved(value: T) -> Self {
        Self::from_outcome(Outcome::Resolved(value))
    }

    /// A rejected promise. `reason` is wrapped as is; use
    /// [`Promise::rejected_with`] to pass an existing [`Reason`].
    pub fn rejected<R: Any + fmt::Debug>(reason: R) -> Self {
        Self::rejected_with(Reason::new(reason))
    }

    pub fn rejected_with(reason: Reason) -> Self {
        Self::from_outcome(Outcome::Rejected(reason))
    }

    pub fn canceled(reason: CancelReason) -> Self {
        Self::from_outcome(Outcome::Canceled(reason))
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self::from_node(NodeCell::settled(outcome))
    }

    pub fn id(&self) -> PromiseId {
        self.node.id()
    }

    pub fn state(&self) -> State {
        self.node.state()
    }

    pub fn is_pending(&self) -> bool {
        self.node.is_pending()
    }

    /// Runs `on_resolved` with the value. Rejections and cancelations pass
    /// through to the returned promise.
    pub fn then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then_flow(move |value| Flow::Resolve(on_resolved(value)))
    }

    pub fn then_flow<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> Flow<U> + 'static,
    {
        chain::attach(self, None, Reaction::resolved(Box::new(on_resolved)))
    }

    /// Chains a callback that returns another promise; the returned
    /// promise settles when that one does.
    pub fn and_then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> Promise<U> + 'static,
    {
        self.then_flow(move |value| Flow::Adopt(on_resolved(value)))
    }

    /// `then` with a reject handler for reasons of type `E`. Reasons of
    /// other types pass through.
    pub fn then_or_catch<U, E, F, G>(self, on_resolved: F, on_rejected: G) -> Promise<U>
    where
        U: 'static,
        E: Any,
        F: FnOnce(T) -> U + 'static,
        G: FnOnce(&E) -> U + 'static,
    {
        chain::attach(self, None, resolve_or_catch(on_resolved, on_rejected))
    }

    /// Recovers from rejections whose reason is an `E`.
    pub fn catch<E, F>(self, on_rejected: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + 'static,
    {
        self.catch_flow(move |reason: &E| Flow::Resolve(on_rejected(reason)))
    }

    pub fn catch_flow<E, F>(self, on_rejected: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> Flow<T> + 'static,
    {
        chain::attach(self, None, Reaction::rejected(chain::typed_rejection(on_rejected)))
    }

    /// Recovers from any rejection.
    pub fn catch_any<F>(self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(&Reason) -> T + 'static,
    {
        let handler = move |reason: &Reason| Some(Flow::Resolve(on_rejected(reason)));
        chain::attach(self, None, Reaction::rejected(Box::new(handler)))
    }

    pub fn catch_cancelation<F>(self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce(&CancelReason) -> T + 'static,
    {
        self.catch_cancelation_flow(move |reason: &CancelReason| {
            Flow::Resolve(on_canceled(reason))
        })
    }

    pub fn catch_cancelation_flow<F>(self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce(&CancelReason) -> Flow<T> + 'static,
    {
        chain::attach(self, None, Reaction::canceled(Box::new(on_canceled)))
    }

    /// Runs `on_settled` whatever the outcome.
    pub fn continue_with<U, F>(self, on_settled: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> U + 'static,
    {
        self.continue_with_flow(move |outcome| Flow::Resolve(on_settled(outcome)))
    }

    pub fn continue_with_flow<U, F>(self, on_settled: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Flow<U> + 'static,
    {
        chain::attach(self, None, Reaction::Settled(Box::new(on_settled)))
    }

    /// Runs `on_settled` and then settles the returned promise exactly like
    /// this one.
    pub fn finally<F>(self, on_settled: F) -> Promise<T>
    where
        F: FnOnce() + 'static,
    {
        self.continue_with_flow(move |outcome| {
            on_settled();
            Flow::from(outcome)
        })
    }

    /// Listens to normalized progress in [0, 1]. Reports arrive only from
    /// [`Manager::handle_completes_and_progress`](crate::Manager::handle_completes_and_progress)
    /// and stop for good if the promise is rejected or canceled.
    pub fn progress<F>(self, listener: F) -> Self
    where
        F: FnMut(f32) + 'static,
    {
        self.node.add_progress_listener(Box::new(listener));
        self
    }

    /// Registers the next continuation under `token`.
    pub fn cancelable(self, token: CancelationToken) -> Cancelable<T> {
        Cancelable {
            promise: self,
            token,
        }
    }

    /// Releases the handle without observing the outcome. A rejection that
    /// nothing else observes goes to the uncaught-rejection handler.
    pub fn forget(self) {
        let node = self.into_node();
        node.release_handle(false);
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Switches to multi-consumer mode.
    pub fn preserve(self) -> PreservedPromise<T> {
        let node = self.into_node();
        node.preserve(T::clone);
        PreservedPromise {
            node,
            released: false,
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.consumed {
            self.node.release_handle(manager::validation());
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.node.id())
            .field("state", &self.node.state())
            .finish()
    }
}

fn resolve_or_catch<T, U, E, F, G>(on_resolved: F, on_rejected: G) -> Reaction<T, U>
where
    E: Any,
    F: FnOnce(T) -> U + 'static,
    G: FnOnce(&E) -> U + 'static,
{
    Reaction::Slots {
        on_resolved: OnResolved::Handle(Box::new(move |value| {
            Flow::Resolve(on_resolved(value))
        })),
        on_rejected: Some(chain::typed_rejection(move |reason: &E| {
            Flow::Resolve(on_rejected(reason))
        })),
        on_canceled: None,
    }
}

/// A continuation registration scoped to a [`CancelationToken`].
///
/// If the token fires before the parent settles, the child is canceled and
/// the handler never runs. If the handler returned a promise that is still
/// pending when the token fires, the child is canceled and the nested
/// outcome is ignored.
#[must_use = "a cancelable promise must be consumed"]
pub struct Cancelable<T> {
    promise: Promise<T>,
    token: CancelationToken,
}

impl<T: 'static> Cancelable<T> {
    pub fn then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then_flow(move |value| Flow::Resolve(on_resolved(value)))
    }

    pub fn then_flow<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> Flow<U> + 'static,
    {
        chain::attach(
            self.promise,
            Some(self.token),
            Reaction::resolved(Box::new(on_resolved)),
        )
    }

    pub fn and_then<U, F>(self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> Promise<U> + 'static,
    {
        self.then_flow(move |value| Flow::Adopt(on_resolved(value)))
    }

    pub fn then_or_catch<U, E, F, G>(self, on_resolved: F, on_rejected: G) -> Promise<U>
    where
        U: 'static,
        E: Any,
        F: FnOnce(T) -> U + 'static,
        G: FnOnce(&E) -> U + 'static,
    {
        let reaction = resolve_or_catch(on_resolved, on_rejected);
        chain::attach(self.promise, Some(self.token), reaction)
    }

    pub fn catch<E, F>(self, on_rejected: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + 'static,
    {
        self.catch_flow(move |reason: &E| Flow::Resolve(on_rejected(reason)))
    }

    pub fn catch_flow<E, F>(self, on_rejected: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> Flow<T> + 'static,
    {
        chain::attach(
            self.promise,
            Some(self.token),
            Reaction::rejected(chain::typed_rejection(on_rejected)),
        )
    }

    pub fn catch_cancelation<F>(self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce(&CancelReason) -> T + 'static,
    {
        self.catch_cancelation_flow(move |reason: &CancelReason| {
            Flow::Resolve(on_canceled(reason))
        })
    }

    /// A cancelation of the parent still reaches this handler. Only the
    /// token firing first skips it.
    pub fn catch_cancelation_flow<F>(self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce(&CancelReason) -> Flow<T> + 'static,
    {
        chain::attach(
            self.promise,
            Some(self.token),
            Reaction::canceled(Box::new(on_canceled)),
        )
    }

    pub fn continue_with<U, F>(self, on_settled: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> U + 'static,
    {
        self.continue_with_flow(move |outcome| Flow::Resolve(on_settled(outcome)))
    }

    pub fn continue_with_flow<U, F>(self, on_settled: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Flow<U> + 'static,
    {
        chain::attach(
            self.promise,
            Some(self.token),
            Reaction::Settled(Box::new(on_settled)),
        )
    }
}

/// A promise in multi-consumer mode.
///
/// Every handle from [`PreservedPromise::duplicate`] observes the same
/// outcome; values are cloned for each observer. Release it with
/// [`PreservedPromise::forget`] once no more handles are needed.
#[must_use = "a preserved promise must be forgotten"]
pub struct PreservedPromise<T> {
    node: NodeRef<T>,
    released: bool,
}

impl<T: Clone + 'static> PreservedPromise<T> {
    pub fn duplicate(&self) -> Promise<T> {
        Promise::from_node(Rc::clone(&self.node))
    }

    pub fn id(&self) -> PromiseId {
        self.node.id()
    }

    pub fn state(&self) -> State {
        self.node.state()
    }

    pub fn then<U, F>(&self, on_resolved: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.duplicate().then(on_resolved)
    }

    pub fn catch<E, F>(&self, on_rejected: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + 'static,
    {
        self.duplicate().catch(on_rejected)
    }

    pub fn catch_cancelation<F>(&self, on_canceled: F) -> Promise<T>
    where
        F: FnOnce(&CancelReason) -> T + 'static,
    {
        self.duplicate().catch_cancelation(on_canceled)
    }

    pub fn continue_with<U, F>(&self, on_settled: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> U + 'static,
    {
        self.duplicate().continue_with(on_settled)
    }

    pub fn forget(mut self) {
        self.released = true;
        self.node.release_preserved(false);
    }
}

impl<T> Drop for PreservedPromise<T> {
    fn drop(&mut self) {
        if !self.released {
            self.node.release_preserved(manager::validation());
        }
    }
}

impl<T> fmt::Debug for PreservedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreservedPromise")
            .field("id", &self.node.id())
            .field("state", &self.node.state())
            .finish()
    }
}
