use crate::container::Outcome;
use crate::error::AwaitError;
use crate::promise::Promise;
use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Awaiting a promise consumes it. The future completes once a drain has
/// delivered the outcome: a resolved value comes back as `Ok`, a rejection
/// as [`AwaitError::Rejected`] and a cancelation as
/// [`AwaitError::Canceled`].
///
/// # Examples
///
/// ```
/// use futures::executor::LocalPool;
/// use futures::task::LocalSpawnExt;
/// use promise_chain::{Deferred, Manager};
///
/// let mut pool = LocalPool::new();
/// let (deferred, promise) = Deferred::<u8>::new();
/// let task = pool
///     .spawner()
///     .spawn_local_with_handle(async move { promise.await })
///     .unwrap();
///
/// deferred.resolve(7).unwrap();
/// pool.run_until_stalled();
/// Manager::handle_completes();
/// assert_eq!(pool.run_until(task).unwrap(), 7);
/// ```
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Finished,
}

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    waker: Result<Waker, WakerState>,
}

impl<T: 'static> IntoFuture for Promise<T> {
    type Output = Result<T, AwaitError>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        let slot = Rc::new(RefCell::new(Slot {
            outcome: None,
            waker: Err(WakerState::Fresh),
        }));
        let sink = Rc::clone(&slot);
        self.consume().subscribe(Box::new(move |outcome| {
            let waker = {
                let mut slot = sink.borrow_mut();
                slot.outcome = Some(outcome);
                mem::replace(&mut slot.waker, Err(WakerState::Finished))
            };
            if let Ok(waker) = waker {
                waker.wake();
            }
        }));
        PromiseFuture { slot }
    }
}

impl<T> Future for PromiseFuture<T> {
    type Output = Result<T, AwaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome.into_result()),
            None => {
                if !matches!(slot.waker, Err(WakerState::Finished)) {
                    slot.waker = Ok(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
