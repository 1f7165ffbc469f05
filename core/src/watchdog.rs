//! One-shot cancellation timer for the in-process backend.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Cooperative cancellation flag shared with the running engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const DISARMED: u8 = 2;

/// Cancels its token after a delay unless disarmed first.
///
/// The armed state moves to either fired or disarmed exactly once, so a
/// disarm racing with expiry never double-fires and disarming after the
/// operation completed is a no-op.
#[derive(Debug)]
pub struct Watchdog {
    state: Arc<AtomicU8>,
    token: CancelToken,
    timer: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Must be called from within a tokio runtime.
    pub fn arm(after: Duration, token: CancelToken) -> Self {
        let state = Arc::new(AtomicU8::new(ARMED));
        let timer = {
            let state = Arc::clone(&state);
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if state
                    .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    log::debug!("watchdog fired after {:?}", after);
                    token.cancel();
                }
            })
        };
        Self {
            state,
            token,
            timer: Some(timer),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Stops the timer. Returns whether it had already fired.
    pub fn disarm(&mut self) -> bool {
        let _ = self
            .state
            .compare_exchange(ARMED, DISARMED, Ordering::AcqRel, Ordering::Acquire);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.has_fired()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
