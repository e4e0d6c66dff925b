//! Timer bridge.
//!
//! `setTimeout` parks the callback under a fresh `TimerToken` and announces
//! `(token, delay, window)` to the host, which owns scheduling. At expiry the
//! host re-enters with the token.

use super::{CallbackResult, FireOutcome};
use crate::channel::{HostChannel, HostOp};
use crate::error::{BridgeError, CallbackFailure, CallbackSite, Result};
use crate::handle::{Claim, TimerToken, Token, TokenTable, WindowId};
use crate::metrics::BridgeMetrics;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A parked timer callback; runs at most once
pub type TimerCallback = Box<dyn FnOnce() -> CallbackResult + Send>;

/// Registry of parked timers
pub struct TimerBridge {
    table: Mutex<TokenTable<TimerToken, TimerCallback>>,
    retain_fired: bool,
}

impl TimerBridge {
    /// Create a new timer bridge
    pub fn new(retain_fired: bool) -> Self {
        Self {
            table: Mutex::new(TokenTable::new()),
            retain_fired,
        }
    }

    /// Park `callback` and ask the host to fire it after `delay_ms`.
    ///
    /// The callback is parked before the host hears about it, so a host
    /// that fires synchronously from inside the call still finds it. If the
    /// host refuses the call the callback is unparked again.
    pub fn set_timeout(
        &self,
        channel: &HostChannel,
        window: WindowId,
        callback: TimerCallback,
        delay_ms: f64,
    ) -> Result<TimerToken> {
        let token = self.table.lock().mint(callback);
        let announced = channel.call(
            HostOp::SetTimeout,
            vec![token.into(), delay_ms.into(), window.into()],
        );

        if let Err(error) = announced {
            let unparked = self.table.lock().remove(token);
            drop(unparked);
            return Err(error);
        }
        Ok(token)
    }

    /// Run the callback parked under `token`.
    ///
    /// A token fires at most once; a repeated signal is logged and ignored.
    pub fn fire(&self, token: TimerToken, metrics: &BridgeMetrics) -> Result<FireOutcome> {
        // Lock released before the callback runs: it may call setTimeout.
        let claim = self.table.lock().claim(token, self.retain_fired);

        match claim {
            Claim::Ready(callback) => {
                callback().map_err(|error| {
                    metrics.record_callback_failure();
                    BridgeError::from(CallbackFailure::new(CallbackSite::Timer, 0, error))
                })?;
                Ok(FireOutcome::Ran)
            }
            Claim::Spent => {
                warn!(token = %token, "Timer already fired, ignoring repeated signal");
                metrics.record_duplicate_reentry();
                Ok(FireOutcome::AlreadyFired)
            }
            Claim::Cleared => {
                debug!(token = %token, "Timer dropped by teardown, ignoring signal");
                Ok(FireOutcome::Cleared)
            }
            Claim::Unknown => Err(BridgeError::UnknownToken {
                kind: TimerToken::KIND,
                token: token.raw(),
            }),
        }
    }

    /// Timers still waiting for the host
    pub fn pending(&self) -> usize {
        self.table.lock().parked()
    }

    /// Tokens ever minted
    pub fn minted(&self) -> u64 {
        self.table.lock().minted()
    }

    /// Entries held, including spent markers
    pub fn entries(&self) -> usize {
        self.table.lock().len()
    }

    /// Drop every parked timer
    pub fn clear(&self) {
        // Callbacks are dropped after the lock is released
        let parked = self.table.lock().drain();
        drop(parked);
    }
}
