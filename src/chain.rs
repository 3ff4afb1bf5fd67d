//! Continuation records.
//!
//! Every `then`/`catch`/`continue_with` call becomes one [`Reaction`]
//! registered on the parent node together with the child node it feeds. When
//! the parent's outcome is delivered, the slot matching that outcome runs;
//! if there is no such slot, or a typed reject slot does not match the
//! reason, the outcome passes through to the child untouched.

use crate::cancel::CancelationToken;
use crate::container::{CancelReason, Outcome, Reason};
use crate::error::Error;
use crate::manager;
use crate::node::{NodeCell, NodeRef, Upstream};
use crate::progress;
use crate::promise::{Flow, Promise};
use std::any::Any;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

pub(crate) type ResolveFn<T, U> = Box<dyn FnOnce(T) -> Flow<U>>;
/// Returns `None` when the reason is not the type the handler accepts.
pub(crate) type RejectFn<U> = Box<dyn FnOnce(&Reason) -> Option<Flow<U>>>;
pub(crate) type CancelFn<U> = Box<dyn FnOnce(&CancelReason) -> Flow<U>>;
pub(crate) type SettledFn<T, U> = Box<dyn FnOnce(Outcome<T>) -> Flow<U>>;

pub(crate) enum OnResolved<T, U> {
    Handle(ResolveFn<T, U>),
    /// No resolve handler: the value goes to the child as is.
    Forward(fn(T) -> U),
}

pub(crate) enum Reaction<T, U> {
    Slots {
        on_resolved: OnResolved<T, U>,
        on_rejected: Option<RejectFn<U>>,
        on_canceled: Option<CancelFn<U>>,
    },
    Settled(SettledFn<T, U>),
}

impl<T, U> Reaction<T, U> {
    pub(crate) fn resolved(f: ResolveFn<T, U>) -> Self {
        Reaction::Slots {
            on_resolved: OnResolved::Handle(f),
            on_rejected: None,
            on_canceled: None,
        }
    }
}

impl<T> Reaction<T, T> {
    pub(crate) fn rejected(f: RejectFn<T>) -> Self {
        Reaction::Slots {
            on_resolved: OnResolved::Forward(std::convert::identity),
            on_rejected: Some(f),
            on_canceled: None,
        }
    }

    pub(crate) fn canceled(f: CancelFn<T>) -> Self {
        Reaction::Slots {
            on_resolved: OnResolved::Forward(std::convert::identity),
            on_rejected: None,
            on_canceled: Some(f),
        }
    }
}

/// Wraps a handler for reasons of type `E` into a reject slot.
pub(crate) fn typed_rejection<E, U, F>(f: F) -> RejectFn<U>
where
    E: Any,
    F: FnOnce(&E) -> Flow<U> + 'static,
{
    Box::new(move |reason: &Reason| reason.downcast_ref::<E>().map(f))
}

/// The failure a reject/cancel handler is currently running for, which is
/// what [`Flow::Rethrow`] re-raises.
enum Raised {
    Rejected(Reason),
    Canceled(CancelReason),
}

impl Raised {
    fn of<T>(outcome: &Outcome<T>) -> Option<Raised> {
        match outcome {
            Outcome::Resolved(_) => None,
            Outcome::Rejected(reason) => Some(Raised::Rejected(reason.clone())),
            Outcome::Canceled(reason) => Some(Raised::Canceled(reason.clone())),
        }
    }

    fn into_outcome<U>(self) -> Outcome<U> {
        match self {
            Raised::Rejected(reason) => Outcome::Rejected(reason),
            Raised::Canceled(reason) => Outcome::Canceled(reason),
        }
    }
}

/// Consumes `parent` and registers `reaction` on it. The returned promise
/// is the child the reaction settles.
pub(crate) fn attach<T: 'static, U: 'static>(
    parent: Promise<T>,
    token: Option<CancelationToken>,
    reaction: Reaction<T, U>,
) -> Promise<U> {
    let parent = parent.consume();
    let child = NodeCell::<U>::pending(parent.depth() + 1);
    let promise = Promise::from_node(Rc::clone(&child));
    if let Some(token) = &token {
        child.bind_token(token);
    }
    let upstream: Weak<dyn Upstream> = Rc::downgrade(&parent) as Weak<_>;
    child.wait_on(upstream);

    let weak = Rc::downgrade(&child);
    let child_depth = child.depth();
    parent.add_progress_dependent(Rc::new(move |value| {
        if let Some(child) = weak.upgrade() {
            child.set_progress(progress::scale_to_child(value, child_depth));
        }
    }));

    parent.subscribe(Box::new(move |outcome| react(outcome, reaction, &child)));
    promise
}

fn react<T: 'static, U: 'static>(
    outcome: Outcome<T>,
    reaction: Reaction<T, U>,
    child: &NodeRef<U>,
) {
    if !child.is_pending() {
        trace!(promise = %child.id(), "continuation skipped, child already settled");
        report_if_rejected(child.id(), outcome);
        return;
    }
    let raised = Raised::of(&outcome);
    let flow = match (reaction, outcome) {
        (Reaction::Settled(f), outcome) => f(outcome),
        (Reaction::Slots { on_resolved, .. }, Outcome::Resolved(value)) => match on_resolved {
            OnResolved::Handle(f) => f(value),
            OnResolved::Forward(forward) => Flow::Resolve(forward(value)),
        },
        (Reaction::Slots { on_rejected: Some(f), .. }, Outcome::Rejected(reason)) => {
            match f(&reason) {
                Some(flow) => flow,
                None => Flow::Reject(reason),
            }
        }
        (Reaction::Slots { on_canceled: Some(f), .. }, Outcome::Canceled(reason)) => f(&reason),
        (Reaction::Slots { .. }, Outcome::Rejected(reason)) => Flow::Reject(reason),
        (Reaction::Slots { .. }, Outcome::Canceled(reason)) => Flow::Cancel(reason),
    };
    apply(child, flow, raised);
}

/// A rejection arriving for a child that already settled reached no handler.
fn report_if_rejected<T>(promise: manager::PromiseId, outcome: Outcome<T>) {
    if let Outcome::Rejected(reason) = outcome {
        manager::report_uncaught(promise, reason);
    }
}

/// Settles `child` from what a handler returned.
fn apply<U: 'static>(child: &NodeRef<U>, flow: Flow<U>, raised: Option<Raised>) {
    let outcome = match flow {
        Flow::Resolve(value) => Outcome::Resolved(value),
        Flow::Reject(reason) => Outcome::Rejected(reason),
        Flow::Cancel(reason) => Outcome::Canceled(reason),
        Flow::Rethrow => match raised {
            Some(raised) => raised.into_outcome(),
            None => Outcome::Rejected(Reason::new(Error::RethrowOutsideHandler)),
        },
        Flow::Adopt(nested) => {
            adopt(child, nested);
            return;
        }
    };
    child.try_settle(outcome);
}

/// Defers `child` until `nested` settles, then mirrors its outcome. If the
/// child settles first (its token fired), a nested value or cancelation is
/// dropped and a nested rejection goes to the uncaught handler.
///
/// `nested` must not wait on `child`, directly or through other pending
/// promises; such a loop rejects `child` with [`Error::CircularAdoption`].
pub(crate) fn adopt<U: 'static>(child: &NodeRef<U>, nested: Promise<U>) {
    let nested = nested.consume();
    if Rc::ptr_eq(&nested, child) || nested.depends_on(child.id()) {
        debug!(promise = %child.id(), adopted = %nested.id(), "circular adoption");
        child.try_settle(Outcome::Rejected(Reason::new(Error::CircularAdoption)));
        return;
    }
    trace!(promise = %child.id(), adopted = %nested.id(), "adopting nested promise");
    let upstream: Weak<dyn Upstream> = Rc::downgrade(&nested) as Weak<_>;
    child.wait_on(upstream);

    let weak = Rc::downgrade(child);
    let child_depth = child.depth();
    nested.add_progress_dependent(Rc::new(move |value| {
        if let Some(child) = weak.upgrade() {
            child.set_progress(progress::last_slot(value, child_depth));
        }
    }));

    let child = Rc::clone(child);
    nested.subscribe(Box::new(move |outcome| {
        if !child.is_pending() {
            trace!(promise = %child.id(), "adopted outcome discarded");
            report_if_rejected(child.id(), outcome);
            return;
        }
        child.try_settle(outcome);
    }));
}
