use crate::cancel::CancelationToken;
use crate::container::Outcome;
use crate::manager;
use crate::node::{NodeCell, NodeRef, Upstream};
use crate::promise::Promise;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// One step of a [`sequence`]: called once the previous step resolved.
pub type Stage = Box<dyn FnOnce() -> Promise<()>>;

struct Run {
    target: NodeRef<()>,
    stages: RefCell<VecDeque<Stage>>,
    token: CancelationToken,
    total: usize,
    finished: Cell<usize>,
}

impl Run {
    fn next(self: Rc<Self>) {
        if !self.target.is_pending() {
            return;
        }
        if let Some(reason) = self.token.cancel_reason() {
            debug!(promise = %self.target.id(), stage = self.finished.get(), "sequence canceled");
            self.target.try_settle(Outcome::Canceled(reason));
            return;
        }
        let stage = self.stages.borrow_mut().pop_front();
        let Some(stage) = stage else {
            self.target.try_settle(Outcome::Resolved(()));
            return;
        };
        let index = self.finished.get();
        trace!(promise = %self.target.id(), stage = index, "starting stage");
        let node = stage().consume();
        let upstream: Weak<dyn Upstream> = Rc::downgrade(&node) as Weak<_>;
        self.target.wait_on(upstream);

        let run = Rc::downgrade(&self);
        node.add_progress_dependent(Rc::new(move |value| {
            if let Some(run) = run.upgrade() {
                let overall = (index as f64 + value) / run.total as f64;
                run.target.set_progress(overall);
            }
        }));

        node.subscribe(Box::new(move |outcome| match outcome {
            Outcome::Resolved(()) => {
                self.finished.set(index + 1);
                self.next();
            }
            Outcome::Rejected(reason) => {
                debug!(promise = %self.target.id(), stage = index, "sequence stage rejected");
                if !self.target.is_pending() {
                    manager::report_uncaught(self.target.id(), reason);
                    return;
                }
                self.target.try_settle(Outcome::Rejected(reason));
            }
            Outcome::Canceled(reason) => {
                self.target.try_settle(Outcome::Canceled(reason));
            }
        }));
    }
}

/// Runs `stages` one after another, each once the previous one resolved.
///
/// The first stage starts during the next drain. `token` is checked before
/// every stage; once it is canceled no further stage starts and the result
/// is canceled right away. The first stage to reject or cancel settles the
/// result the same way. No stages resolves immediately.
///
/// ```
/// use promise_chain::{sequence, CancelationToken, Manager, Promise, Stage};
///
/// let stages: Vec<Stage> = vec![
///     Box::new(|| Promise::resolved(())),
///     Box::new(|| Promise::<()>::rejected("Error")),
///     Box::new(|| -> Promise<()> { unreachable!() }),
/// ];
/// sequence(CancelationToken::none(), stages)
///     .catch(|reason: &&str| assert_eq!(*reason, "Error"))
///     .forget();
/// Manager::handle_completes();
/// ```
pub fn sequence<I>(token: CancelationToken, stages: I) -> Promise<()>
where
    I: IntoIterator<Item = Stage>,
{
    let stages: VecDeque<Stage> = stages.into_iter().collect();
    if stages.is_empty() {
        return Promise::resolved(());
    }
    let total = stages.len();
    let depth = u32::try_from(total - 1).unwrap_or(u32::MAX);
    let target = NodeCell::pending(depth);
    let promise = Promise::from_node(Rc::clone(&target));
    target.bind_token(&token);

    let run = Rc::new(Run {
        target,
        stages: RefCell::new(stages),
        token,
        total,
        finished: Cell::new(0),
    });
    manager::enqueue(Box::new(move || run.next()));
    promise
}
