//! Completion and progress queues, pumped explicitly by the host.
//!
//! Nothing in this crate runs a continuation inline. Settling a promise
//! pushes one job per registered continuation onto the completion queue, and
//! progress changes mark the affected promise in the progress queue. The
//! host calls [`Manager::handle_completes`] or
//! [`Manager::handle_completes_and_progress`] from its own tick to fire
//! them. Jobs that settle more promises append to the same queue, so the
//! drain is breadth-first and never recurses.
//!
//! The state lives in a `thread_local!`. Promise handles are `!Send`, so for
//! a host that keeps to one thread this is the whole process, while each
//! test thread gets an isolated engine.

use crate::container::Reason;
use crate::error::Error;
use crate::progress::ProgressTarget;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::Rc;
use tracing::{debug, warn};

pub(crate) type Job = Box<dyn FnOnce()>;

/// Identifier assigned to every promise node, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    validation: bool,
    progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            progress: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count and log handles that are dropped without being consumed,
    /// forgotten or disposed.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Queue progress reports. When off, progress listeners never fire.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn progress(&self) -> bool {
        self.progress
    }
}

/// A rejection that reached the end of a chain without being handled.
#[derive(Debug, Clone)]
pub struct UnhandledRejection {
    pub promise: PromiseId,
    pub reason: Reason,
}

type UncaughtHandler = Rc<dyn Fn(&UnhandledRejection)>;

#[derive(Default)]
struct Context {
    completions: RefCell<VecDeque<Job>>,
    progress: RefCell<VecDeque<Rc<dyn ProgressTarget>>>,
    draining: Cell<bool>,
    config: Cell<Config>,
    uncaught: RefCell<Option<UncaughtHandler>>,
    next_id: Cell<u64>,
    live_promises: Cell<usize>,
    leaked_handles: Cell<usize>,
    live_sources: Cell<usize>,
    leaked_sources: Cell<usize>,
}

thread_local! {
    static CONTEXT: Context = Context::default();
}

/// Runs `f` against the thread's context. Returns `None` only while the
/// thread is tearing down its locals.
fn with_context<R>(f: impl FnOnce(&Context) -> R) -> Option<R> {
    CONTEXT.try_with(f).ok()
}

struct DrainGuard;

impl DrainGuard {
    fn enter() -> Option<DrainGuard> {
        let busy = with_context(|cx| cx.draining.replace(true)).unwrap_or(true);
        if busy {
            None
        } else {
            Some(DrainGuard)
        }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        with_context(|cx| cx.draining.set(false));
    }
}

/// Host-facing pump and engine-wide settings.
pub struct Manager;

impl Manager {
    /// Fires every queued continuation, including the ones queued while
    /// draining. Returns how many ran.
    ///
    /// Calling this from inside a continuation is a no-op that returns 0;
    /// the outer drain picks up the new work.
    pub fn handle_completes() -> usize {
        match DrainGuard::enter() {
            Some(_guard) => drain_completions(),
            None => 0,
        }
    }

    /// Drains completions, then progress reports, until both queues are
    /// empty. Returns the number of completions and progress deliveries.
    pub fn handle_completes_and_progress() -> (usize, usize) {
        let Some(_guard) = DrainGuard::enter() else {
            return (0, 0);
        };
        let mut totals = (0, 0);
        loop {
            let completed = drain_completions();
            let reported = drain_progress();
            totals.0 += completed;
            totals.1 += reported;
            if completed == 0 && reported == 0 {
                break;
            }
        }
        totals
    }

    pub fn configure(config: Config) {
        with_context(|cx| cx.config.set(config));
    }

    pub fn config() -> Config {
        with_context(|cx| cx.config.get()).unwrap_or_default()
    }

    pub fn set_uncaught_rejection_handler<F>(handler: F)
    where
        F: Fn(&UnhandledRejection) + 'static,
    {
        let handler: UncaughtHandler = Rc::new(handler);
        with_context(|cx| *cx.uncaught.borrow_mut() = Some(handler));
    }

    pub fn clear_uncaught_rejection_handler() {
        let previous = with_context(|cx| cx.uncaught.borrow_mut().take()).flatten();
        drop(previous);
    }

    pub fn pending_completions() -> usize {
        with_context(|cx| cx.completions.borrow().len()).unwrap_or(0)
    }

    /// Promise nodes currently allocated on this thread.
    pub fn live_promises() -> usize {
        with_context(|cx| cx.live_promises.get()).unwrap_or(0)
    }

    /// Fails when promise nodes are still alive, or when validation saw
    /// handles or cancelation sources dropped without being released.
    pub fn check_leaks() -> Result<(), Error> {
        let (promises, handles, sources) = with_context(|cx| {
            (
                cx.live_promises.get(),
                cx.leaked_handles.get(),
                cx.live_sources.get() + cx.leaked_sources.get(),
            )
        })
        .unwrap_or((0, 0, 0));
        if promises == 0 && handles == 0 && sources == 0 {
            Ok(())
        } else {
            Err(Error::Leaked {
                promises,
                handles,
                sources,
            })
        }
    }

    /// Drops every queued job, clears the handler, the counters and the
    /// configuration.
    pub fn reset_for_testing() {
        let dropped = with_context(|cx| {
            let completions = mem::take(&mut *cx.completions.borrow_mut());
            let progress = mem::take(&mut *cx.progress.borrow_mut());
            let handler = cx.uncaught.borrow_mut().take();
            cx.config.set(Config::default());
            (completions, progress, handler)
        });
        // Jobs may own producers whose drop settles more promises.
        drop(dropped);
        with_context(|cx| {
            cx.completions.borrow_mut().clear();
            cx.progress.borrow_mut().clear();
            cx.live_promises.set(0);
            cx.leaked_handles.set(0);
            cx.live_sources.set(0);
            cx.leaked_sources.set(0);
        });
    }
}

fn drain_completions() -> usize {
    let mut fired = 0;
    while let Some(job) = with_context(|cx| cx.completions.borrow_mut().pop_front()).flatten() {
        job();
        fired += 1;
    }
    if fired > 0 {
        debug!(fired, "drained completion queue");
    }
    fired
}

fn drain_progress() -> usize {
    let mut delivered = 0;
    while let Some(target) = with_context(|cx| cx.progress.borrow_mut().pop_front()).flatten() {
        target.deliver_progress();
        delivered += 1;
    }
    delivered
}

pub(crate) fn enqueue(job: Job) {
    with_context(|cx| cx.completions.borrow_mut().push_back(job));
}

pub(crate) fn enqueue_progress(target: Rc<dyn ProgressTarget>) {
    with_context(|cx| cx.progress.borrow_mut().push_back(target));
}

pub(crate) fn validation() -> bool {
    Manager::config().validation
}

pub(crate) fn progress_enabled() -> bool {
    Manager::config().progress
}

pub(crate) fn node_created() -> PromiseId {
    with_context(|cx| {
        let id = cx.next_id.get() + 1;
        cx.next_id.set(id);
        cx.live_promises.set(cx.live_promises.get() + 1);
        PromiseId(id)
    })
    .unwrap_or(PromiseId(0))
}

pub(crate) fn node_dropped() {
    with_context(|cx| cx.live_promises.set(cx.live_promises.get().saturating_sub(1)));
}

pub(crate) fn handle_leaked(promise: PromiseId) {
    warn!(%promise, "promise handle dropped without being consumed or forgotten");
    with_context(|cx| cx.leaked_handles.set(cx.leaked_handles.get() + 1));
}

pub(crate) fn source_created() {
    with_context(|cx| cx.live_sources.set(cx.live_sources.get() + 1));
}

pub(crate) fn source_released(leaked: bool) {
    if leaked {
        warn!("cancelation source dropped without being disposed");
    }
    with_context(|cx| {
        cx.live_sources.set(cx.live_sources.get().saturating_sub(1));
        if leaked {
            cx.leaked_sources.set(cx.leaked_sources.get() + 1);
        }
    });
}

pub(crate) fn report_uncaught(promise: PromiseId, reason: Reason) {
    let handler = with_context(|cx| cx.uncaught.borrow().clone()).flatten();
    let rejection = UnhandledRejection { promise, reason };
    match handler {
        Some(handler) => handler(&rejection),
        None => warn!(
            %promise,
            reason = %rejection.reason,
            reason_type = rejection.reason.value_type(),
            "uncaught rejection"
        ),
    }
}
