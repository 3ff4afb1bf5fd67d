//! Completion value containers.
//!
//! A settled promise holds exactly one [`Outcome`]. Rejection and
//! cancelation reasons are type-erased and reference counted, so the same
//! reason can be observed by several consumers without copying or mutating
//! the value underneath.

use crate::error::AwaitError;
use std::any::{type_name, Any};
use std::fmt;
use std::rc::Rc;

/// Lifecycle state of a promise node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Resolved,
    Rejected,
    Canceled,
}

impl State {
    pub fn is_pending(self) -> bool {
        self == State::Pending
    }

    /// Rejected or canceled.
    pub fn is_unfavorable(self) -> bool {
        matches!(self, State::Rejected | State::Canceled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Resolved => write!(f, "resolved"),
            State::Rejected => write!(f, "rejected"),
            State::Canceled => write!(f, "canceled"),
        }
    }
}

trait ReasonValue: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<R: Any + fmt::Debug> ReasonValue for R {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased rejection reason.
///
/// Cloning a `Reason` shares the underlying value; [`Reason::consumers`]
/// reports how many holders currently observe it.
#[derive(Clone)]
pub struct Reason {
    value: Rc<dyn ReasonValue>,
    value_type: &'static str,
}

impl Reason {
    pub fn new<R: Any + fmt::Debug>(value: R) -> Self {
        Self {
            value: Rc::new(value),
            value_type: type_name::<R>(),
        }
    }

    /// Name of the concrete type this reason was created from.
    pub fn value_type(&self) -> &'static str {
        self.value_type
    }

    pub fn is<R: Any>(&self) -> bool {
        self.value.as_any().is::<R>()
    }

    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.value.as_any().downcast_ref::<R>()
    }

    /// Number of live holders of this reason.
    pub fn consumers(&self) -> usize {
        Rc::strong_count(&self.value)
    }

    /// True when both handles point at the same reason object.
    pub fn same_as(&self, other: &Reason) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reason")
            .field("type", &self.value_type)
            .field("value", &self.value)
            .finish()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

/// Why a promise was canceled. A cancelation does not need a reason.
#[derive(Debug, Clone, Default)]
pub struct CancelReason(Option<Reason>);

impl CancelReason {
    pub fn none() -> Self {
        CancelReason(None)
    }

    pub fn new<R: Any + fmt::Debug>(value: R) -> Self {
        CancelReason(Some(Reason::new(value)))
    }

    pub fn reason(&self) -> Option<&Reason> {
        self.0.as_ref()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.0.as_ref().and_then(Reason::downcast_ref)
    }
}

impl From<Reason> for CancelReason {
    fn from(reason: Reason) -> Self {
        CancelReason(Some(reason))
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(reason) => write!(f, "{reason}"),
            None => write!(f, "no reason given"),
        }
    }
}

/// The settled result of a promise.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Resolved(T),
    Rejected(Reason),
    Canceled(CancelReason),
}

impl<T> Outcome<T> {
    pub fn state(&self) -> State {
        match self {
            Outcome::Resolved(_) => State::Resolved,
            Outcome::Rejected(_) => State::Rejected,
            Outcome::Canceled(_) => State::Canceled,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Outcome::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Resolved(value) => Outcome::Resolved(f(value)),
            Outcome::Rejected(reason) => Outcome::Rejected(reason),
            Outcome::Canceled(reason) => Outcome::Canceled(reason),
        }
    }

    /// Converts into the await contract: rejections become
    /// [`AwaitError::Rejected`], cancelations [`AwaitError::Canceled`].
    pub fn into_result(self) -> Result<T, AwaitError> {
        match self {
            Outcome::Resolved(value) => Ok(value),
            Outcome::Rejected(reason) => Err(AwaitError::Rejected(reason)),
            Outcome::Canceled(reason) => Err(AwaitError::Canceled(reason)),
        }
    }

    pub(crate) fn duplicate(&self, clone_value: fn(&T) -> T) -> Self {
        match self {
            Outcome::Resolved(value) => Outcome::Resolved(clone_value(value)),
            Outcome::Rejected(reason) => Outcome::Rejected(reason.clone()),
            Outcome::Canceled(reason) => Outcome::Canceled(reason.clone()),
        }
    }
}
