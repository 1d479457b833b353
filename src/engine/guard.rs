//! Containment for embedded engines that try to end the host process.
//!
//! Engines linked into the gateway must call [`request_exit`] where they would
//! otherwise call `std::process::exit`. The request unwinds as a panic with a
//! [`TerminationRequest`] payload, which [`contain`] turns back into an
//! ordinary request-scoped failure. Requires `panic = "unwind"`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Panic payload raised by [`request_exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRequest {
    pub code: i32,
}

/// Drop-in replacement for `std::process::exit` for embedded engines.
pub fn request_exit(code: i32) -> ! {
    panic::panic_any(TerminationRequest { code })
}

/// Failure captured while running engine code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainedFailure {
    Termination { code: i32 },
    Panic(String),
}

impl fmt::Display for ContainedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainedFailure::Termination { code } => write!(
                f,
                "engine attempted to terminate the host process (exit status {code})"
            ),
            ContainedFailure::Panic(message) => write!(f, "engine panicked: {message}"),
        }
    }
}

static QUIET_HOOK: Once = Once::new();

/// Keep termination requests out of the panic log. Other panics still reach
/// the previously installed hook.
pub fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<TerminationRequest>().is_some() {
                return;
            }
            previous(info);
        }));
    });
}

/// Run engine code, converting panics and exit requests into a value.
pub fn contain<T>(f: impl FnOnce() -> T) -> Result<T, ContainedFailure> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(classify_payload)
}

fn classify_payload(payload: Box<dyn Any + Send>) -> ContainedFailure {
    if let Some(request) = payload.downcast_ref::<TerminationRequest>() {
        return ContainedFailure::Termination { code: request.code };
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ContainedFailure::Panic(message)
}
