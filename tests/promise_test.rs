mod common;

use common::*;
use promise_chain::{
    CancelReason, Config, Deferred, Error, Flow, Manager, Outcome, Promise, Reason, State,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn resolve_then_drain_fires_once() {
    fresh_engine();
    let (deferred, promise) = Deferred::<i32>::new();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    promise
        .then(move |value| {
            assert_eq!(value, 10);
            counter.set(counter.get() + 1);
        })
        .forget();

    deferred.resolve(10).unwrap();
    assert_eq!(calls.get(), 0);
    Manager::handle_completes();
    Manager::handle_completes();
    assert_eq!(calls.get(), 1);
    assert_eq!(deferred.resolve(11), Err(Error::AlreadySettled));
    assert!(!deferred.try_resolve(12));
}

#[test]
fn settled_value_survives_later_attempts() {
    fresh_engine();
    let (deferred, promise) = Deferred::<&str>::new();
    deferred.reject("first").unwrap();
    assert!(!deferred.try_reject("second"));
    assert!(!deferred.try_resolve("value"));
    let seen = capture(promise);
    Manager::handle_completes();
    assert_eq!(rejection_text(&seen), Some("first"));
}

#[test]
fn continuations_on_settled_promises_wait_for_the_drain() {
    fresh_engine();
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    Promise::resolved(()).then(move |()| flag.set(true)).forget();
    assert!(!ran.get());
    assert_eq!(Manager::pending_completions(), 1);
    Manager::handle_completes();
    assert!(ran.get());
}

#[test]
fn long_chains_drain_without_recursion() {
    fresh_engine();
    let mut promise = Promise::resolved(0u32);
    for _ in 0..10_000 {
        promise = promise.then(|value| value + 1);
    }
    let seen = capture(promise);
    Manager::handle_completes();
    assert_eq!(seen.borrow().as_ref().and_then(Outcome::value), Some(&10_000));
}

#[test]
fn delivery_is_breadth_first() {
    fresh_engine();
    let order = log();
    let (deferred_a, a) = Deferred::<()>::new();
    let (deferred_b, b) = Deferred::<()>::new();
    for (name, promise) in [("a", a), ("b", b)] {
        let first = Rc::clone(&order);
        let second = Rc::clone(&order);
        promise
            .then(move |()| first.borrow_mut().push(format!("{name}1")))
            .then(move |()| second.borrow_mut().push(format!("{name}2")))
            .forget();
    }
    deferred_a.resolve(()).unwrap();
    deferred_b.resolve(()).unwrap();
    Manager::handle_completes();
    assert_eq!(*order.borrow(), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn typed_handlers_let_other_reasons_through() {
    fresh_engine();
    let handled = log();
    let sink = Rc::clone(&handled);
    let seen = capture(
        Promise::<i32>::rejected(404u16)
            .catch(move |text: &String| {
                sink.borrow_mut().push(text.clone());
                0
            })
            .then(|value| value + 1),
    );
    Manager::handle_completes();
    assert!(handled.borrow().is_empty());
    let reason = seen.borrow().as_ref().and_then(Outcome::reason).cloned();
    assert_eq!(reason.as_ref().and_then(Reason::downcast_ref::<u16>), Some(&404));
}

#[test]
fn then_or_catch_picks_the_matching_slot() {
    fresh_engine();
    let resolved = capture(Promise::resolved(2).then_or_catch(|v| v * 10, |_: &&str| -1));
    let rejected =
        capture(Promise::<i32>::rejected("bad").then_or_catch(|v| v * 10, |_: &&str| -1));
    Manager::handle_completes();
    assert_eq!(resolved.borrow().as_ref().and_then(Outcome::value), Some(&20));
    assert_eq!(rejected.borrow().as_ref().and_then(Outcome::value), Some(&-1));
}

#[test]
fn catch_any_sees_every_reason() {
    fresh_engine();
    let seen = capture(Promise::<String>::rejected(3.5f64).catch_any(|reason| reason.to_string()));
    Manager::handle_completes();
    assert_eq!(
        seen.borrow().as_ref().and_then(Outcome::value).map(String::as_str),
        Some("3.5")
    );
}

#[test]
fn rethrow_keeps_the_original_reason() {
    fresh_engine();
    let original = Reason::new("boom");
    let seen = capture(
        Promise::<()>::rejected_with(original.clone()).catch_flow(|_: &&str| Flow::Rethrow),
    );
    Manager::handle_completes();
    let reason = seen.borrow().as_ref().and_then(Outcome::reason).cloned();
    assert!(reason.map_or(false, |reason| reason.same_as(&original)));
}

#[test]
fn rethrow_from_a_resolve_handler_is_an_error() {
    fresh_engine();
    let seen = capture(Promise::resolved(()).then_flow(|()| Flow::<()>::Rethrow));
    Manager::handle_completes();
    let error = seen
        .borrow()
        .as_ref()
        .and_then(Outcome::reason)
        .and_then(|reason| reason.downcast_ref::<Error>().cloned());
    assert_eq!(error, Some(Error::RethrowOutsideHandler));
}

#[test]
fn handlers_can_reject_and_cancel_with_values() {
    fresh_engine();
    let rejected = capture(Promise::resolved(1).then_flow(|_| Flow::<i32>::reject("no")));
    let canceled = capture(Promise::resolved(1).then_flow(|_| Flow::<i32>::cancel("stop")));
    Manager::handle_completes();
    assert_eq!(rejection_text(&rejected), Some("no"));
    match canceled.borrow().as_ref() {
        Some(Outcome::Canceled(reason)) => assert_eq!(reason.downcast_ref::<&str>(), Some(&"stop")),
        other => panic!("expected cancelation, got {other:?}"),
    };
}

#[test]
fn nested_promises_are_flattened() {
    fresh_engine();
    let (inner, nested) = Deferred::<i32>::new();
    let seen = capture(Promise::resolved(1).and_then(move |_| nested));
    Manager::handle_completes();
    assert!(seen.borrow().is_none());
    inner.resolve(42).unwrap();
    Manager::handle_completes();
    assert_eq!(seen.borrow().as_ref().and_then(Outcome::value), Some(&42));
}

#[test]
fn adopting_itself_is_rejected() {
    fresh_engine();
    let slot: Rc<RefCell<Option<Promise<i32>>>> = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&slot);
    let preserved = Promise::resolved(1)
        .and_then(move |_| {
            inner
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Promise::resolved(0))
        })
        .preserve();
    *slot.borrow_mut() = Some(preserved.duplicate());
    let seen = capture(preserved.duplicate());
    preserved.forget();
    Manager::handle_completes();
    let error = seen
        .borrow()
        .as_ref()
        .and_then(Outcome::reason)
        .and_then(|reason| reason.downcast_ref::<Error>().cloned());
    assert_eq!(error, Some(Error::CircularAdoption));
}

#[test]
fn adopting_a_descendant_is_circular() {
    fresh_engine();
    let slot: Rc<RefCell<Option<Promise<i32>>>> = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&slot);
    let outer = Promise::resolved(1).and_then(move |_| {
        inner
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Promise::resolved(0))
    });
    let descendant = outer.then(|value| value + 1).preserve();
    *slot.borrow_mut() = Some(descendant.duplicate());
    let seen = capture(descendant.duplicate());
    descendant.forget();
    Manager::handle_completes();
    let error = seen
        .borrow()
        .as_ref()
        .and_then(Outcome::reason)
        .and_then(|reason| reason.downcast_ref::<Error>().cloned());
    assert_eq!(error, Some(Error::CircularAdoption));
}

#[test]
fn continue_with_and_finally_see_every_outcome() {
    fresh_engine();
    let states = Rc::new(RefCell::new(Vec::new()));
    let finals = Rc::new(Cell::new(0));
    let inputs = vec![
        Promise::resolved(1),
        Promise::rejected("r"),
        Promise::canceled(CancelReason::none()),
    ];
    for promise in inputs {
        let sink = Rc::clone(&states);
        let counter = Rc::clone(&finals);
        promise
            .finally(move || counter.set(counter.get() + 1))
            .continue_with(move |outcome: Outcome<i32>| sink.borrow_mut().push(outcome.state()))
            .forget();
    }
    Manager::handle_completes();
    assert_eq!(finals.get(), 3);
    assert_eq!(
        *states.borrow(),
        vec![State::Resolved, State::Rejected, State::Canceled]
    );
}

#[test]
fn unhandled_rejection_reaches_the_handler_and_cancelation_does_not() {
    fresh_engine();
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    Manager::set_uncaught_rejection_handler(move |rejection| {
        sink.borrow_mut().push(rejection.reason.to_string());
    });

    Promise::<i32>::rejected("lost")
        .then(|value| value + 1)
        .catch(|_: &u8| 0)
        .forget();
    Promise::<i32>::canceled(CancelReason::new("quiet"))
        .then(|value| value + 1)
        .forget();
    Manager::handle_completes();
    assert_eq!(*reports.borrow(), vec!["\"lost\"".to_string()]);
}

#[test]
fn handled_rejection_is_not_reported() {
    fresh_engine();
    let reports = Rc::new(Cell::new(0));
    let counter = Rc::clone(&reports);
    Manager::set_uncaught_rejection_handler(move |_| counter.set(counter.get() + 1));
    let (deferred, promise) = Deferred::<()>::new();
    promise.catch(|_: &&str| ()).forget();
    deferred.reject("handled").unwrap();
    Manager::handle_completes();
    assert_eq!(reports.get(), 0);
}

#[test]
fn preserved_promises_feed_every_consumer() {
    fresh_engine();
    let (deferred, promise) = Deferred::<Vec<u8>>::new();
    let preserved = promise.preserve();
    let lengths = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..3 {
        let sink = Rc::clone(&lengths);
        preserved
            .then(move |bytes| sink.borrow_mut().push(bytes.len()))
            .forget();
    }
    deferred.resolve(vec![1, 2, 3]).unwrap();
    Manager::handle_completes();
    assert_eq!(*lengths.borrow(), vec![3, 3, 3]);
    assert_eq!(preserved.state(), State::Resolved);
    preserved.forget();
}

#[test]
fn everything_is_released_after_the_drain() {
    fresh_engine();
    Manager::configure(Config::new().with_validation(true));
    {
        let (deferred, promise) = Deferred::<u8>::new();
        promise.then(|value| value * 2).forget();
        deferred.resolve(4).unwrap();
    }
    Manager::handle_completes();
    assert_eq!(Manager::live_promises(), 0);
    assert_eq!(Manager::check_leaks(), Ok(()));
}

#[test]
fn validation_counts_dropped_handles() {
    fresh_engine();
    Manager::configure(Config::new().with_validation(true));
    let promise = Promise::resolved(1);
    let id = promise.id();
    drop(promise);
    assert_eq!(Manager::live_promises(), 0);
    assert_eq!(
        Manager::check_leaks(),
        Err(Error::Leaked {
            promises: 0,
            handles: 1,
            sources: 0
        })
    );
    assert!(id.to_string().starts_with("promise#"));
}
