mod common;

use common::*;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use promise_chain::{merge2, AwaitError, CancelationSource, Deferred, Manager, Promise};
use std::cell::RefCell;
use std::rc::Rc;

/// Alternates executor and engine until neither has work left.
fn pump(pool: &mut LocalPool) {
    loop {
        pool.run_until_stalled();
        if Manager::handle_completes() == 0 {
            break;
        }
    }
}

#[test]
fn await_resumes_only_after_a_drain() {
    fresh_engine();
    let mut pool = LocalPool::new();
    let (deferred, promise) = Deferred::<String>::new();
    let result = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&result);
    pool.spawner()
        .spawn_local(async move {
            *sink.borrow_mut() = Some(promise.await);
        })
        .unwrap();

    pool.run_until_stalled();
    deferred.resolve("done".into()).unwrap();
    pool.run_until_stalled();
    assert!(result.borrow().is_none());

    Manager::handle_completes();
    pool.run_until_stalled();
    let value = result.borrow_mut().take().map(|r| r.unwrap());
    assert_eq!(value.as_deref(), Some("done"));
}

#[test]
fn rejection_and_cancelation_are_distinct_errors() {
    fresh_engine();
    let mut pool = LocalPool::new();
    let source = CancelationSource::new();
    let (rejecting, rejected) = Deferred::<u8>::new();
    let (_canceling, canceled) = Deferred::<u8>::with_token(&source.token());
    let spawner = pool.spawner();
    let rejected = spawner
        .spawn_local_with_handle(async move { rejected.await })
        .unwrap();
    let canceled = spawner
        .spawn_local_with_handle(async move { canceled.await })
        .unwrap();
    pool.run_until_stalled();

    rejecting.reject("broken").unwrap();
    source.cancel_with("stopped").unwrap();
    Manager::handle_completes();

    match pool.run_until(rejected) {
        Err(AwaitError::Rejected(reason)) => {
            assert_eq!(reason.downcast_ref::<&str>(), Some(&"broken"))
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    let error = pool.run_until(canceled).unwrap_err();
    assert!(error.is_canceled());
    match error {
        AwaitError::Canceled(reason) => assert_eq!(reason.downcast_ref::<&str>(), Some(&"stopped")),
        other => panic!("expected a cancelation, got {other:?}"),
    }
    source.dispose();
}

#[test]
fn async_blocks_compose_with_chains() {
    fresh_engine();
    let mut pool = LocalPool::new();
    let (left, a) = Deferred::<u32>::new();
    let (right, b) = Deferred::<u32>::new();
    let task = pool
        .spawner()
        .spawn_local_with_handle(async move {
            let (x, y) = merge2(a, b).await?;
            Promise::resolved(x + y).then(|sum| sum * 2).await
        })
        .unwrap();

    left.resolve(3).unwrap();
    right.resolve(4).unwrap();
    pump(&mut pool);
    let outcome = task.now_or_never();
    assert_eq!(outcome.map(|result| result.ok()), Some(Some(14)));
}
