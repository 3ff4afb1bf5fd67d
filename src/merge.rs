//! Combinators that wait on several promises at once.
//!
//! Every input handle is consumed. Once the combined promise has settled,
//! inputs that are still pending are left to finish on their own and their
//! outcomes are dropped; nothing has to forget them.

use crate::container::{Outcome, State};
use crate::error::Error;
use crate::node::{NodeCell, NodeRef};
use crate::progress::{Aggregation, ProgressAggregate};
use crate::promise::Promise;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

/// Folds the progress of a combinator's inputs into its target.
struct Gauge<O> {
    target: Weak<NodeCell<O>>,
    aggregate: RefCell<ProgressAggregate>,
}

impl<O: 'static> Gauge<O> {
    fn new(target: &NodeRef<O>, depths: &[u32], mode: Aggregation) -> Rc<Self> {
        Rc::new(Self {
            target: Rc::downgrade(target),
            aggregate: RefCell::new(ProgressAggregate::new(depths, mode)),
        })
    }

    fn watch<T: 'static>(self: &Rc<Self>, index: usize, input: &NodeRef<T>) {
        let gauge = Rc::downgrade(self);
        input.add_progress_dependent(Rc::new(move |value| {
            if let Some(gauge) = gauge.upgrade() {
                gauge.update(index, value);
            }
        }));
    }

    fn update(&self, index: usize, value: f64) {
        let combined = self.aggregate.borrow_mut().update(index, value);
        self.publish(combined);
    }

    fn complete(&self, index: usize) {
        let combined = self.aggregate.borrow_mut().complete(index);
        self.publish(combined);
    }

    fn publish(&self, combined: f64) {
        if let Some(target) = self.target.upgrade() {
            target.set_progress(combined);
        }
    }

    fn freeze(&self, index: usize) {
        self.aggregate.borrow_mut().freeze(index);
    }
}

fn deepest(depths: &[u32]) -> u32 {
    depths.iter().copied().max().unwrap_or(0)
}

type Store<S, T> = fn(&mut S, usize, T);

/// Shared state of one merge: result slots and the count of inputs that
/// have not resolved yet.
struct Join<S, O> {
    target: NodeRef<O>,
    gauge: Rc<Gauge<O>>,
    slots: RefCell<S>,
    remaining: Cell<usize>,
    finish: fn(&mut S) -> Option<O>,
}

impl<S: 'static, O: 'static> Join<S, O> {
    fn start(depths: &[u32], slots: S, finish: fn(&mut S) -> Option<O>) -> Rc<Self> {
        let target = NodeCell::pending(deepest(depths));
        Rc::new(Self {
            gauge: Gauge::new(&target, depths, Aggregation::Sum),
            target,
            slots: RefCell::new(slots),
            remaining: Cell::new(depths.len()),
            finish,
        })
    }

    fn promise(&self) -> Promise<O> {
        Promise::from_node(Rc::clone(&self.target))
    }

    fn input<T: 'static>(self: &Rc<Self>, index: usize, promise: Promise<T>, store: Store<S, T>) {
        let node = promise.consume();
        self.gauge.watch(index, &node);
        let join = Rc::clone(self);
        node.subscribe(Box::new(move |outcome| join.deliver(index, outcome, store)));
    }

    fn deliver<T>(&self, index: usize, outcome: Outcome<T>, store: Store<S, T>) {
        let failure = match outcome {
            Outcome::Resolved(value) => {
                let output = {
                    let mut slots = self.slots.borrow_mut();
                    store(&mut slots, index, value);
                    let remaining = self.remaining.get().saturating_sub(1);
                    self.remaining.set(remaining);
                    if remaining == 0 {
                        (self.finish)(&mut slots)
                    } else {
                        None
                    }
                };
                self.gauge.complete(index);
                if let Some(output) = output {
                    self.target.try_settle(Outcome::Resolved(output));
                }
                return;
            }
            Outcome::Rejected(reason) => Outcome::Rejected(reason),
            Outcome::Canceled(reason) => Outcome::Canceled(reason),
        };
        self.gauge.freeze(index);
        let state = failure.state();
        if self.target.try_settle(failure) {
            debug!(promise = %self.target.id(), input = index, %state, "merge failed fast");
        } else {
            debug!(
                promise = %self.target.id(),
                input = index,
                %state,
                "late merge input discarded"
            );
        }
    }
}

macro_rules! merge_tuple {
    ($(#[$meta:meta])* $name:ident; $($T:ident $p:ident $idx:tt),+) => {
        $(#[$meta])*
        pub fn $name<$($T: 'static),+>($($p: Promise<$T>),+) -> Promise<($($T,)+)> {
            let depths = [$($p.depth()),+];
            let join = Join::start(
                &depths,
                ($(None::<$T>,)+),
                |slots: &mut ($(Option<$T>,)+)| Some(($(slots.$idx.take()?,)+)),
            );
            $(join.input($idx, $p, |slots, _, value| slots.$idx = Some(value));)+
            join.promise()
        }
    };
}

merge_tuple!(
    /// Resolves with both values once both inputs resolve. The first input
    /// to reject or cancel settles the result the same way.
    ///
    /// ```
    /// use promise_chain::{merge2, Manager, Promise};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let seen = Rc::new(RefCell::new(None));
    /// let sink = Rc::clone(&seen);
    /// merge2(Promise::resolved(1), Promise::resolved("x"))
    ///     .then(move |pair| *sink.borrow_mut() = Some(pair))
    ///     .forget();
    /// Manager::handle_completes();
    /// assert_eq!(*seen.borrow(), Some((1, "x")));
    /// ```
    merge2; A a 0, B b 1
);
merge_tuple!(
    /// Three-input [`merge2`].
    merge3; A a 0, B b 1, C c 2
);
merge_tuple!(
    /// Four-input [`merge2`].
    merge4; A a 0, B b 1, C c 2, D d 3
);
merge_tuple!(
    /// Five-input [`merge2`].
    merge5; A a 0, B b 1, C c 2, D d 3, E e 4
);
merge_tuple!(
    /// Six-input [`merge2`].
    merge6; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5
);

/// Resolves with every value, in input order. An empty input resolves
/// with an empty `Vec`.
pub fn merge_all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolved(Vec::new());
    }
    let depths: Vec<u32> = promises.iter().map(Promise::depth).collect();
    let slots: Vec<Option<T>> = promises.iter().map(|_| None).collect();
    let join = Join::start(&depths, slots, |slots: &mut Vec<Option<T>>| {
        slots.iter_mut().map(Option::take).collect()
    });
    for (index, promise) in promises.into_iter().enumerate() {
        join.input(index, promise, |slots, index, value| {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(value);
            }
        });
    }
    join.promise()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Any settlement wins.
    AnySettlement,
    /// The first resolution wins; failures only count once all inputs
    /// have failed.
    FirstResolution,
}

struct Contest<T> {
    target: NodeRef<T>,
    gauge: Rc<Gauge<T>>,
    remaining: Cell<usize>,
    rule: Rule,
}

impl<T: 'static> Contest<T> {
    fn run<I>(promises: I, rule: Rule) -> Promise<T>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        let promises: Vec<Promise<T>> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::rejected(Error::NothingToRace);
        }
        let depths: Vec<u32> = promises.iter().map(Promise::depth).collect();
        let target = NodeCell::pending(deepest(&depths));
        let contest = Rc::new(Self {
            gauge: Gauge::new(&target, &depths, Aggregation::Max),
            target,
            remaining: Cell::new(promises.len()),
            rule,
        });
        let result = Promise::from_node(Rc::clone(&contest.target));
        for (index, promise) in promises.into_iter().enumerate() {
            let node = promise.consume();
            contest.gauge.watch(index, &node);
            let contest = Rc::clone(&contest);
            node.subscribe(Box::new(move |outcome| contest.deliver(index, outcome)));
        }
        result
    }

    fn deliver(&self, index: usize, outcome: Outcome<T>) {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        let state = outcome.state();
        if state == State::Resolved {
            self.gauge.complete(index);
        } else {
            self.gauge.freeze(index);
        }
        let decisive = match self.rule {
            Rule::AnySettlement => true,
            Rule::FirstResolution => state == State::Resolved || remaining == 0,
        };
        if decisive && self.target.try_settle(outcome) {
            debug!(promise = %self.target.id(), input = index, %state, "race decided");
        }
    }
}

/// Settles like whichever input settles first.
pub fn race<T, I>(promises: I) -> Promise<T>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    Contest::run(promises, Rule::AnySettlement)
}

/// Resolves with the first input to resolve. If none does, settles like
/// the last input to fail.
pub fn first<T, I>(promises: I) -> Promise<T>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    Contest::run(promises, Rule::FirstResolution)
}
