//! Interrupt window for a running invocation.
//!
//! An external party (a scheduler shutting down, an operator) may ask an
//! invocation to stop with [`RunUtil::interrupt`]. The request is only
//! honored while interrupts are allowed: the engine opens the window for
//! setup and test execution and closes it before teardown, so teardown and
//! cleanup can never be cut short. A request made while the window is
//! closed stays pending until it opens again.
//!
//! Tests observe interrupts at their blocking points through
//! [`check_interrupted`](RunUtil::check_interrupted) and
//! [`sleep`](RunUtil::sleep).

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{InvocationError, InvocationResult};

/// Interrupt state of one invocation.
#[derive(Debug, Default)]
pub struct RunUtil {
    allowed: AtomicBool,
    pending: Mutex<Option<String>>,
    token: Mutex<CancellationToken>,
}

impl RunUtil {
    /// Creates a run util with interrupts disallowed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens or closes the interrupt window.
    pub fn allow_interrupt(&self, allow: bool) {
        debug!("run interrupt allowed: {}", allow);
        self.allowed.store(allow, Ordering::SeqCst);
    }

    /// Returns `true` while interrupts are honored.
    pub fn is_interrupt_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    /// Requests an interrupt with the given reason.
    pub fn interrupt(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("interrupt requested: {}", message);
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        self.token.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    /// Fails with [`InvocationError::RunInterrupted`] if an interrupt is
    /// pending and the window is open. Consumes the pending request.
    pub fn check_interrupted(&self) -> InvocationResult<()> {
        if !self.is_interrupt_allowed() {
            return Ok(());
        }
        let Some(message) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
        else {
            return Ok(());
        };
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
        Err(InvocationError::RunInterrupted(message))
    }

    /// Sleeps for `duration`, waking early if interrupted inside the window.
    pub async fn sleep(&self, duration: Duration) -> InvocationResult<()> {
        self.check_interrupted()?;
        if !self.is_interrupt_allowed() {
            tokio::time::sleep(duration).await;
            return Ok(());
        }
        let token = self.token.lock().unwrap_or_else(|e| e.into_inner()).clone();
        select! {
            _ = tokio::time::sleep(duration) => {}
            _ = token.cancelled() => {
                debug!("sleep interrupted");
            }
        }
        self.check_interrupted()
    }
}
