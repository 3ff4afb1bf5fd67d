mod common;

use common::*;
use promise_chain::{
    first, merge2, merge4, merge_all, race, sequence, CancelReason, CancelationSource,
    CancelationToken, Deferred, Manager, Outcome, Promise, Stage, State,
};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn merge_of_settled_promises_is_a_tuple() {
    fresh_engine();
    let seen = capture(merge2(Promise::resolved(1), Promise::resolved("x")));
    Manager::handle_completes();
    assert_eq!(seen.borrow().as_ref().and_then(Outcome::value), Some(&(1, "x")));
}

#[test]
fn merge_resolves_in_input_order_whatever_the_arrival_order() {
    fresh_engine();
    let (d0, p0) = Deferred::<u8>::new();
    let (d1, p1) = Deferred::<String>::new();
    let (d2, p2) = Deferred::<bool>::new();
    let (d3, p3) = Deferred::<()>::new();
    let seen = capture(merge4(p0, p1, p2, p3));
    d3.resolve(()).unwrap();
    d1.resolve("one".into()).unwrap();
    d2.resolve(false).unwrap();
    Manager::handle_completes();
    assert!(seen.borrow().is_none());
    d0.resolve(0).unwrap();
    Manager::handle_completes();
    assert_eq!(
        seen.borrow().as_ref().and_then(Outcome::value),
        Some(&(0, "one".to_string(), false, ()))
    );
}

#[test]
fn merge_takes_the_first_failure_in_arrival_order() {
    fresh_engine();
    let (d0, p0) = Deferred::<u8>::new();
    let (d1, p1) = Deferred::<u8>::new();
    let seen = capture(merge2(p0, p1));
    d1.reject("second input").unwrap();
    d0.reject("first input").unwrap();
    Manager::handle_completes();
    assert_eq!(rejection_text(&seen), Some("second input"));
}

#[test]
fn merge_siblings_finish_on_their_own() {
    fresh_engine();
    let reports = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&reports);
    Manager::set_uncaught_rejection_handler(move |_| *counter.borrow_mut() += 1);

    let (slow, pending) = Deferred::<u8>::new();
    let seen = capture(merge2(Promise::<u8>::canceled(CancelReason::new("early")), pending));
    Manager::handle_completes();
    assert_eq!(seen.borrow().as_ref().map(Outcome::state), Some(State::Canceled));

    slow.reject("late").unwrap();
    drop(slow);
    Manager::handle_completes();
    assert_eq!(*reports.borrow(), 0);
    assert_eq!(Manager::live_promises(), 0);
}

#[test]
fn merge_all_collects_a_vec() {
    fresh_engine();
    let promises: Vec<Promise<usize>> = (0..5).map(Promise::resolved).collect();
    let seen = capture(merge_all(promises));
    Manager::handle_completes();
    assert_eq!(
        seen.borrow().as_ref().and_then(Outcome::value),
        Some(&vec![0, 1, 2, 3, 4])
    );
}

#[test]
fn race_and_first_disagree_on_failures() {
    fresh_engine();
    let (d_race, p_race) = Deferred::<u8>::new();
    let (d_first, p_first) = Deferred::<u8>::new();
    let raced = capture(race(vec![Promise::rejected("fast"), p_race]));
    let firsted = capture(first(vec![Promise::rejected("fast"), p_first]));
    Manager::handle_completes();
    d_race.resolve(1).unwrap();
    d_first.resolve(2).unwrap();
    Manager::handle_completes();
    assert_eq!(rejection_text(&raced), Some("fast"));
    assert_eq!(firsted.borrow().as_ref().and_then(Outcome::value), Some(&2));
}

#[test]
fn sequence_runs_stages_strictly_in_order() {
    fresh_engine();
    let order = log();
    let (gate, pending) = Deferred::<()>::new();
    let first_log = Rc::clone(&order);
    let second_log = Rc::clone(&order);
    let stages: Vec<Stage> = vec![
        Box::new(move || {
            first_log.borrow_mut().push("one".into());
            pending
        }),
        Box::new(move || {
            second_log.borrow_mut().push("two".into());
            Promise::resolved(())
        }),
    ];
    let seen = capture(sequence(CancelationToken::none(), stages));
    Manager::handle_completes();
    assert_eq!(*order.borrow(), vec!["one"]);
    gate.resolve(()).unwrap();
    Manager::handle_completes();
    assert_eq!(*order.borrow(), vec!["one", "two"]);
    assert_eq!(seen.borrow().as_ref().map(Outcome::state), Some(State::Resolved));
}

#[test]
fn sequence_rejection_skips_the_remaining_stages() {
    fresh_engine();
    let invoked = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&invoked);
    let caught = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&caught);
    let stages: Vec<Stage> = vec![
        Box::new(|| Promise::<()>::rejected("Error")),
        Box::new(move || {
            *flag.borrow_mut() = true;
            Promise::resolved(())
        }),
    ];
    sequence(CancelationToken::none(), stages)
        .catch(move |reason: &&str| *sink.borrow_mut() = Some(*reason))
        .forget();
    Manager::handle_completes();
    assert_eq!(*caught.borrow(), Some("Error"));
    assert!(!*invoked.borrow());
}

#[test]
fn sequence_under_a_canceled_token_runs_nothing() {
    fresh_engine();
    let source = CancelationSource::new();
    source.cancel_with("before start").unwrap();
    let invoked = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&invoked);
    let stages: Vec<Stage> = vec![Box::new(move || {
        *flag.borrow_mut() = true;
        Promise::resolved(())
    })];
    let seen = capture(sequence(source.token(), stages));
    Manager::handle_completes();
    assert!(!*invoked.borrow());
    match seen.borrow().as_ref() {
        Some(Outcome::Canceled(reason)) => {
            assert_eq!(reason.downcast_ref::<&str>(), Some(&"before start"))
        }
        other => panic!("expected cancelation, got {other:?}"),
    }
    source.dispose();
}

#[test]
fn stage_rejecting_after_the_token_fired_is_reported_as_uncaught() {
    fresh_engine();
    let reports = record_uncaught();
    let source = CancelationSource::new();
    let (gate, pending) = Deferred::<()>::new();
    let stages: Vec<Stage> = vec![Box::new(move || pending)];
    let seen = capture(sequence(source.token(), stages));
    Manager::handle_completes();

    source.cancel().unwrap();
    gate.reject("late stage").unwrap();
    Manager::handle_completes();
    assert_eq!(seen.borrow().as_ref().map(Outcome::state), Some(State::Canceled));
    assert_eq!(*reports.borrow(), vec!["\"late stage\"".to_string()]);
    source.dispose();
}
