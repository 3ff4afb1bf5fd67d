//! Cancelation sources and tokens.
//!
//! A [`CancelationSource`] owns a one-shot broadcast. Every
//! [`CancelationToken`] taken from it observes the same cancelation, and
//! every callback registered through a token runs exactly once,
//! synchronously, in registration order, when the source is canceled.
//! Promises subscribe to tokens; the state change they make is immediate,
//! while their continuations still wait for the next drain.

use crate::container::CancelReason;
use crate::error::Error;
use crate::manager;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use tracing::debug;

type Callback = Box<dyn FnOnce(&CancelReason)>;

enum SourceState {
    Armed,
    Canceled(CancelReason),
    Disposed { canceled: bool },
}

struct SourceInner {
    state: SourceState,
    subscribers: Vec<(u64, Callback)>,
    next_key: u64,
}

/// Owner of a cancelation broadcast.
///
/// Must be released with [`CancelationSource::dispose`]; with validation on,
/// dropping an undisposed source is counted as a leak.
pub struct CancelationSource {
    inner: Rc<RefCell<SourceInner>>,
    disposed: bool,
}

impl CancelationSource {
    pub fn new() -> Self {
        manager::source_created();
        Self {
            inner: Rc::new(RefCell::new(SourceInner {
                state: SourceState::Armed,
                subscribers: Vec::new(),
                next_key: 0,
            })),
            disposed: false,
        }
    }

    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            source: Some(Rc::clone(&self.inner)),
        }
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.token().is_cancelation_requested()
    }

    /// Cancels without a reason. Canceling twice is a no-op.
    pub fn cancel(&self) -> Result<(), Error> {
        self.cancel_with_reason(CancelReason::none())
    }

    pub fn cancel_with<R: Any + fmt::Debug>(&self, reason: R) -> Result<(), Error> {
        self.cancel_with_reason(CancelReason::new(reason))
    }

    pub fn cancel_with_reason(&self, reason: CancelReason) -> Result<(), Error> {
        let subscribers = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                SourceState::Disposed { .. } => return Err(Error::SourceDisposed),
                SourceState::Canceled(_) => return Ok(()),
                SourceState::Armed => {}
            }
            inner.state = SourceState::Canceled(reason.clone());
            mem::take(&mut inner.subscribers)
        };
        debug!(subscribers = subscribers.len(), %reason, "cancelation requested");
        for (_, callback) in subscribers {
            callback(&reason);
        }
        Ok(())
    }

    /// Releases the subscriber records. Tokens stay readable, but
    /// registering through them fails with [`Error::SourceDisposed`].
    pub fn dispose(mut self) {
        self.release();
        self.disposed = true;
        manager::source_released(false);
    }

    fn release(&self) {
        let subscribers = {
            let mut inner = self.inner.borrow_mut();
            let canceled = matches!(inner.state, SourceState::Canceled(_));
            inner.state = SourceState::Disposed { canceled };
            mem::take(&mut inner.subscribers)
        };
        drop(subscribers);
    }
}

impl Default for CancelationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelationSource {
    fn drop(&mut self) {
        if !self.disposed {
            self.release();
            manager::source_released(manager::validation());
        }
    }
}

impl fmt::Debug for CancelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationSource")
            .field("canceled", &self.is_cancelation_requested())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Read-only view of a [`CancelationSource`]. The default token has no
/// source and never cancels.
#[derive(Clone, Default)]
pub struct CancelationToken {
    source: Option<Rc<RefCell<SourceInner>>>,
}

impl CancelationToken {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn can_be_canceled(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.source.as_ref().map_or(false, |source| {
            matches!(
                source.borrow().state,
                SourceState::Canceled(_) | SourceState::Disposed { canceled: true }
            )
        })
    }

    /// The reason the source was canceled with, while it is still
    /// available. A disposed source no longer carries its reason.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        let source = self.source.as_ref()?;
        let inner = source.borrow();
        match &inner.state {
            SourceState::Canceled(reason) => Some(reason.clone()),
            SourceState::Disposed { canceled: true } => Some(CancelReason::none()),
            _ => None,
        }
    }

    /// Subscribes `callback` to the cancelation.
    ///
    /// On an already canceled token the callback runs before this returns.
    /// A token without a source accepts the callback and never runs it.
    pub fn register<F>(&self, callback: F) -> Result<CancelationRegistration, Error>
    where
        F: FnOnce(&CancelReason) + 'static,
    {
        let Some(source) = &self.source else {
            return Ok(CancelationRegistration::inert());
        };
        let canceled = {
            let mut inner = source.borrow_mut();
            let canceled = match &inner.state {
                SourceState::Disposed { .. } => return Err(Error::SourceDisposed),
                SourceState::Canceled(reason) => Some(reason.clone()),
                SourceState::Armed => None,
            };
            if canceled.is_none() {
                let key = inner.next_key;
                inner.next_key += 1;
                inner.subscribers.push((key, Box::new(callback)));
                return Ok(CancelationRegistration {
                    source: Rc::downgrade(source),
                    key,
                });
            }
            canceled
        };
        if let Some(reason) = canceled {
            callback(&reason);
        }
        Ok(CancelationRegistration::inert())
    }
}

impl fmt::Debug for CancelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationToken")
            .field("can_be_canceled", &self.can_be_canceled())
            .field("canceled", &self.is_cancelation_requested())
            .finish()
    }
}

/// A callback subscribed through [`CancelationToken::register`].
#[derive(Debug)]
pub struct CancelationRegistration {
    source: Weak<RefCell<SourceInner>>,
    key: u64,
}

impl CancelationRegistration {
    fn inert() -> Self {
        Self {
            source: Weak::new(),
            key: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.source.upgrade().map_or(false, |source| {
            source
                .borrow()
                .subscribers
                .iter()
                .any(|(key, _)| *key == self.key)
        })
    }

    /// Removes the callback. Returns false when it already ran or was
    /// released.
    pub fn unregister(self) -> bool {
        let Some(source) = self.source.upgrade() else {
            return false;
        };
        let removed = {
            let mut inner = source.borrow_mut();
            let position = inner.subscribers.iter().position(|(key, _)| *key == self.key);
            position.map(|index| inner.subscribers.remove(index))
        };
        removed.is_some()
    }
}

impl fmt::Debug for SourceInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceInner")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
