//! The per-promise state machine.
//!
//! A node moves from `Pending` to exactly one terminal state. Waiters
//! registered before that are moved onto the completion queue when it
//! happens; waiters registered after are queued straight away. Either way
//! they only run during a drain.

use crate::cancel::{CancelationRegistration, CancelationToken};
use crate::container::{Outcome, Reason, State};
use crate::error::Error;
use crate::manager::{self, PromiseId};
use crate::progress::ProgressTarget;
use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};
use tracing::trace;

pub(crate) type NodeRef<T> = Rc<NodeCell<T>>;
pub(crate) type Waiter<T> = Box<dyn FnOnce(Outcome<T>)>;
pub(crate) type ProgressDependent = Rc<dyn Fn(f64)>;

/// Type-erased view of a node, used to follow what a pending node waits on.
pub(crate) trait Upstream {
    fn node_id(&self) -> PromiseId;
    fn waits_on(&self) -> Option<Rc<dyn Upstream>>;
}

pub(crate) struct NodeCell<T> {
    id: PromiseId,
    depth: u32,
    inner: RefCell<Node<T>>,
}

struct Node<T> {
    state: State,
    outcome: Option<Outcome<T>>,
    waiters: Vec<Waiter<T>>,
    /// Deliveries sitting in the completion queue.
    in_flight: usize,
    /// Unconsumed `Promise` handles.
    handles: usize,
    /// Live `PreservedPromise` holders.
    preserved: usize,
    clone_value: Option<fn(&T) -> T>,
    /// Set once anything has consumed the node or its rejection was reported.
    observed: bool,
    progress: f64,
    progress_dependents: Vec<ProgressDependent>,
    progress_listeners: Vec<Box<dyn FnMut(f32)>>,
    progress_queued: bool,
    registration: Option<CancelationRegistration>,
    /// The node this one settles from, while pending.
    waits_on: Option<Weak<dyn Upstream>>,
}

impl<T> NodeCell<T> {
    fn with_state(depth: u32, state: State, outcome: Option<Outcome<T>>) -> Self {
        let id = manager::node_created();
        Self {
            id,
            depth,
            inner: RefCell::new(Node {
                state,
                outcome,
                waiters: Vec::new(),
                in_flight: 0,
                handles: 0,
                preserved: 0,
                clone_value: None,
                observed: false,
                progress: if state == State::Resolved { 1.0 } else { 0.0 },
                progress_dependents: Vec::new(),
                progress_listeners: Vec::new(),
                progress_queued: false,
                registration: None,
                waits_on: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> PromiseId {
        self.id
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn state(&self) -> State {
        self.inner.borrow().state
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub(crate) fn acquire_handle(&self) {
        self.inner.borrow_mut().handles += 1;
    }

    /// Turns one handle into a consumer. The caller subscribes next.
    pub(crate) fn mark_consumed(&self) {
        let mut node = self.inner.borrow_mut();
        node.handles = node.handles.saturating_sub(1);
        node.observed = true;
    }

    /// Drops a handle without consuming it.
    pub(crate) fn release_handle(&self, leaked: bool) {
        let unhandled = {
            let mut node = self.inner.borrow_mut();
            node.handles = node.handles.saturating_sub(1);
            node.take_unobserved_rejection()
        };
        if leaked {
            manager::handle_leaked(self.id);
        }
        if let Some(reason) = unhandled {
            manager::report_uncaught(self.id, reason);
        }
    }

    pub(crate) fn preserve(&self, clone_value: fn(&T) -> T) {
        let mut node = self.inner.borrow_mut();
        node.handles = node.handles.saturating_sub(1);
        node.preserved += 1;
        node.clone_value = Some(clone_value);
    }

    pub(crate) fn release_preserved(&self, leaked: bool) {
        let unhandled = {
            let mut node = self.inner.borrow_mut();
            node.preserved = node.preserved.saturating_sub(1);
            node.take_unobserved_rejection()
        };
        if leaked {
            manager::handle_leaked(self.id);
        }
        if let Some(reason) = unhandled {
            manager::report_uncaught(self.id, reason);
        }
    }

    /// Pulls the outcome for one queued delivery. Values are cloned while
    /// anything else could still observe the node, and moved out for the
    /// last observer.
    fn take_for_delivery(&self) -> Option<Outcome<T>> {
        let mut node = self.inner.borrow_mut();
        node.in_flight = node.in_flight.saturating_sub(1);
        let shared = node.preserved > 0 || node.handles > 0 || node.in_flight > 0;
        match (shared, node.clone_value) {
            (true, Some(clone_value)) => node.outcome.as_ref().map(|o| o.duplicate(clone_value)),
            _ => node.outcome.take(),
        }
    }
}

impl<T> Node<T> {
    fn take_unobserved_rejection(&mut self) -> Option<Reason> {
        let unreachable = self.handles == 0
            && self.preserved == 0
            && self.waiters.is_empty()
            && self.in_flight == 0;
        match &self.outcome {
            Some(Outcome::Rejected(reason)) if unreachable && !self.observed => {
                self.observed = true;
                Some(reason.clone())
            }
            _ => None,
        }
    }
}

impl<T: 'static> NodeCell<T> {
    pub(crate) fn pending(depth: u32) -> NodeRef<T> {
        Rc::new(Self::with_state(depth, State::Pending, None))
    }

    pub(crate) fn settled(outcome: Outcome<T>) -> NodeRef<T> {
        Rc::new(Self::with_state(0, outcome.state(), Some(outcome)))
    }

    /// Records that this node settles from `upstream`.
    pub(crate) fn wait_on(&self, upstream: Weak<dyn Upstream>) {
        let mut node = self.inner.borrow_mut();
        if node.state == State::Pending {
            node.waits_on = Some(upstream);
        }
    }

    /// Whether `target` is somewhere up the chain of pending nodes this one
    /// waits on.
    pub(crate) fn depends_on(&self, target: PromiseId) -> bool {
        let mut next = Upstream::waits_on(self);
        while let Some(node) = next {
            if node.node_id() == target {
                return true;
            }
            next = node.waits_on();
        }
        false
    }

    /// Registers `waiter` for the outcome. On a settled node the delivery is
    /// queued immediately; it still only runs during a drain.
    pub(crate) fn subscribe(self: &Rc<Self>, waiter: Waiter<T>) {
        {
            let mut node = self.inner.borrow_mut();
            if node.state == State::Pending {
                node.waiters.push(waiter);
                return;
            }
            node.in_flight += 1;
        }
        self.schedule_delivery(waiter);
    }

    fn schedule_delivery(self: &Rc<Self>, waiter: Waiter<T>) {
        let node = Rc::clone(self);
        manager::enqueue(Box::new(move || {
            if let Some(outcome) = node.take_for_delivery() {
                trace!(promise = %node.id, state = %outcome.state(), "delivering outcome");
                waiter(outcome);
            }
        }));
    }

    /// Moves the node to its terminal state. Fails if it already left
    /// `Pending`.
    pub(crate) fn settle(self: &Rc<Self>, outcome: Outcome<T>) -> Result<(), Error> {
        let state = outcome.state();
        let (waiters, registration, dependents, dropped_listeners, unhandled) = {
            let mut node = self.inner.borrow_mut();
            if node.state != State::Pending {
                return Err(Error::AlreadySettled);
            }
            node.state = state;
            node.outcome = Some(outcome);
            node.waits_on = None;
            let waiters = mem::take(&mut node.waiters);
            node.in_flight += waiters.len();
            let dependents = mem::take(&mut node.progress_dependents);
            let dropped_listeners = if state == State::Resolved {
                node.progress = 1.0;
                Vec::new()
            } else {
                mem::take(&mut node.progress_listeners)
            };
            let unhandled = if waiters.is_empty() {
                node.take_unobserved_rejection()
            } else {
                None
            };
            (waiters, node.registration.take(), dependents, dropped_listeners, unhandled)
        };
        trace!(promise = %self.id, %state, waiters = waiters.len(), "settled");
        drop(dropped_listeners);
        if let Some(registration) = registration {
            registration.unregister();
        }
        for waiter in waiters {
            self.schedule_delivery(waiter);
        }
        if state == State::Resolved {
            self.queue_progress_report();
            for dependent in dependents {
                dependent(1.0);
            }
        }
        if let Some(reason) = unhandled {
            manager::report_uncaught(self.id, reason);
        }
        Ok(())
    }

    pub(crate) fn try_settle(self: &Rc<Self>, outcome: Outcome<T>) -> bool {
        match self.settle(outcome) {
            Ok(()) => true,
            Err(_) => {
                trace!(promise = %self.id, "settlement ignored, already settled");
                false
            }
        }
    }

    /// Cancels the node when `token` fires. A token that is already
    /// canceled cancels it before this returns.
    pub(crate) fn bind_token(self: &Rc<Self>, token: &CancelationToken) {
        if !token.can_be_canceled() {
            return;
        }
        let weak = Rc::downgrade(self);
        let registered = token.register(move |reason| {
            if let Some(node) = weak.upgrade() {
                node.try_settle(Outcome::Canceled(reason.clone()));
            }
        });
        match registered {
            Ok(registration) => {
                let stale = {
                    let mut node = self.inner.borrow_mut();
                    if node.state == State::Pending {
                        node.registration = Some(registration);
                        None
                    } else {
                        Some(registration)
                    }
                };
                if let Some(registration) = stale {
                    registration.unregister();
                }
            }
            Err(error) => {
                self.try_settle(Outcome::Rejected(Reason::new(error)));
            }
        }
    }

    #[cfg(test)]
    fn progress(&self) -> f64 {
        self.inner.borrow().progress
    }

    /// Raises the node's normalized progress and forwards it to dependents.
    /// Values at or below the current one, and reports on a settled node,
    /// are ignored.
    pub(crate) fn set_progress(self: &Rc<Self>, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let dependents = {
            let mut node = self.inner.borrow_mut();
            if node.state != State::Pending || value <= node.progress {
                return;
            }
            node.progress = value;
            node.progress_dependents.clone()
        };
        self.queue_progress_report();
        for dependent in dependents {
            dependent(value);
        }
    }

    /// Forwards this node's progress into another node. The dependent is
    /// called with the current value right away when there is one.
    pub(crate) fn add_progress_dependent(self: &Rc<Self>, dependent: ProgressDependent) {
        let current = {
            let mut node = self.inner.borrow_mut();
            match node.state {
                State::Pending => {
                    node.progress_dependents.push(Rc::clone(&dependent));
                    node.progress
                }
                State::Resolved => 1.0,
                State::Rejected | State::Canceled => return,
            }
        };
        if current > 0.0 {
            dependent(current);
        }
    }

    pub(crate) fn add_progress_listener(self: &Rc<Self>, listener: Box<dyn FnMut(f32)>) {
        let report = {
            let mut node = self.inner.borrow_mut();
            if node.state.is_unfavorable() {
                false
            } else {
                node.progress_listeners.push(listener);
                node.progress > 0.0
            }
        };
        if report {
            self.queue_progress_report();
        }
    }

    fn queue_progress_report(self: &Rc<Self>) {
        if !manager::progress_enabled() {
            return;
        }
        {
            let mut node = self.inner.borrow_mut();
            if node.progress_queued || node.progress_listeners.is_empty() {
                return;
            }
            node.progress_queued = true;
        }
        let target: Rc<dyn ProgressTarget> = Rc::clone(self) as Rc<dyn ProgressTarget>;
        manager::enqueue_progress(target);
    }
}

impl<T: 'static> ProgressTarget for NodeCell<T> {
    fn deliver_progress(self: Rc<Self>) {
        let (value, mut listeners, state) = {
            let mut node = self.inner.borrow_mut();
            node.progress_queued = false;
            (
                node.progress as f32,
                mem::take(&mut node.progress_listeners),
                node.state,
            )
        };
        if state.is_unfavorable() {
            return;
        }
        for listener in listeners.iter_mut() {
            listener(value);
        }
        if state == State::Resolved {
            // That was the final report.
            return;
        }
        let (stale, requeue) = {
            let mut node = self.inner.borrow_mut();
            if node.state.is_unfavorable() {
                (listeners, false)
            } else {
                listeners.append(&mut node.progress_listeners);
                node.progress_listeners = listeners;
                (Vec::new(), node.progress as f32 > value)
            }
        };
        drop(stale);
        if requeue {
            self.queue_progress_report();
        }
    }
}

impl<T: 'static> Upstream for NodeCell<T> {
    fn node_id(&self) -> PromiseId {
        self.id
    }

    fn waits_on(&self) -> Option<Rc<dyn Upstream>> {
        self.inner.borrow().waits_on.as_ref().and_then(Weak::upgrade)
    }
}

impl<T> Drop for NodeCell<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.inner.get_mut().registration.take() {
            registration.unregister();
        }
        manager::node_dropped();
    }
}
