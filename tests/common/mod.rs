#![allow(dead_code)]

use promise_chain::{Manager, Outcome, Promise};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Logging on, engine state of this thread wiped.
pub fn fresh_engine() {
    init_test_logging();
    Manager::reset_for_testing();
}

pub type Captured<T> = Rc<RefCell<Option<Outcome<T>>>>;

/// Consumes `promise` and stores whatever it settles with.
pub fn capture<T: 'static>(promise: Promise<T>) -> Captured<T> {
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    promise
        .continue_with(move |outcome| *sink.borrow_mut() = Some(outcome))
        .forget();
    seen
}

pub fn rejection_text<T>(captured: &Captured<T>) -> Option<&'static str> {
    captured
        .borrow()
        .as_ref()
        .and_then(Outcome::reason)
        .and_then(|reason| reason.downcast_ref::<&'static str>().copied())
}

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Installs an uncaught-rejection handler that logs each reason.
pub fn record_uncaught() -> Log {
    let reports = log();
    let sink = Rc::clone(&reports);
    Manager::set_uncaught_rejection_handler(move |rejection| {
        sink.borrow_mut().push(rejection.reason.to_string());
    });
    reports
}
