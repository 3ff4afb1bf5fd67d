//! A single-threaded promise engine.
//!
//! A [`Deferred`] produces a value that one or more consumers observe through
//! a [`Promise`]. Consumers chain continuations with `then`, `catch`,
//! `catch_cancelation` and `continue_with`; each returns a new promise for
//! the transformed outcome. Continuations never run inline: settling a
//! promise queues them, and the host fires them by pumping the
//! [`Manager`]. Promises can be canceled through a [`CancelationSource`],
//! joined with [`merge2`] and friends, chained with [`sequence`], report
//! normalized progress, and be awaited from any local executor.
//!
//! ```
//! use promise_chain::{CancelationSource, Deferred, Manager};
//!
//! let source = CancelationSource::new();
//! let (deferred, promise) = Deferred::<u32>::new();
//! promise
//!     .cancelable(source.token())
//!     .then(|value| value + 1)
//!     .catch_cancelation(|_| 0)
//!     .then(|value| assert_eq!(value, 0))
//!     .forget();
//!
//! source.cancel().unwrap();
//! deferred.resolve(1).unwrap();
//! Manager::handle_completes();
//! source.dispose();
//! ```
//!
//! All engine state is per thread, and none of the handles are `Send`.

pub mod cancel;
mod chain;
pub mod container;
pub mod deferred;
pub mod error;
pub mod future;
pub mod manager;
pub mod merge;
mod node;
mod progress;
pub mod promise;
pub mod sequence;

pub use cancel::{CancelationRegistration, CancelationSource, CancelationToken};
pub use container::{CancelReason, Outcome, Reason, State};
pub use deferred::Deferred;
pub use error::{AwaitError, Error};
pub use future::PromiseFuture;
pub use manager::{Config, Manager, PromiseId, UnhandledRejection};
pub use merge::{first, merge2, merge3, merge4, merge5, merge6, merge_all, race};
pub use promise::{Cancelable, Flow, PreservedPromise, Promise};
pub use sequence::{sequence, Stage};
