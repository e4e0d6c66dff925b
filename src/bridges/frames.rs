//! Animation-frame bridge.
//!
//! Handlers queue in registration order. Every registration asks the host
//! for a frame; on the frame reentry the whole queue is swapped out before
//! any handler runs, so handlers that request another frame land in the
//! next pass.

use super::CallbackResult;
use crate::channel::{HostChannel, HostOp};
use crate::error::{CallbackFailure, CallbackSite, Result};
use crate::metrics::BridgeMetrics;
use parking_lot::Mutex;
use tracing::warn;

/// A queued frame handler; runs once
pub type FrameCallback = Box<dyn FnOnce() -> CallbackResult + Send>;

/// What one frame pass did
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Handlers run
    pub ran: usize,

    /// Handlers that returned an error
    pub failures: Vec<CallbackFailure>,
}

#[derive(Default)]
struct FrameQueue {
    handlers: Vec<(u64, FrameCallback)>,
    next: u64,
}

/// Queue of pending frame handlers
pub struct FrameBridge {
    queue: Mutex<FrameQueue>,
}

impl Default for FrameBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBridge {
    /// Create an empty frame bridge
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(FrameQueue::default()),
        }
    }

    /// Queue `handler` and ask the host for a frame.
    ///
    /// If the host refuses the request the handler is taken back out of the
    /// queue, unless a frame pass already ran it.
    pub fn request_animation_frame(
        &self,
        channel: &HostChannel,
        handler: FrameCallback,
    ) -> Result<()> {
        let seq = {
            let mut queue = self.queue.lock();
            let seq = queue.next;
            queue.next += 1;
            queue.handlers.push((seq, handler));
            seq
        };

        if let Err(error) = channel.call(HostOp::RequestAnimationFrame, vec![]) {
            let withdrawn = {
                let mut queue = self.queue.lock();
                queue
                    .handlers
                    .iter()
                    .position(|(queued, _)| *queued == seq)
                    .map(|index| queue.handlers.remove(index))
            };
            drop(withdrawn);
            return Err(error);
        }
        Ok(())
    }

    /// Run every handler queued before this call, in order
    pub fn run_handlers(&self, metrics: &BridgeMetrics) -> FrameOutcome {
        let handlers = std::mem::take(&mut self.queue.lock().handlers);
        let mut outcome = FrameOutcome::default();

        for (index, (_, handler)) in handlers.into_iter().enumerate() {
            outcome.ran += 1;
            if let Err(error) = handler() {
                warn!(index, error = %format!("{:#}", error), "Animation frame handler failed");
                metrics.record_callback_failure();
                outcome
                    .failures
                    .push(CallbackFailure::new(CallbackSite::AnimationFrame, index, error));
            }
        }

        outcome
    }

    /// Handlers waiting for the next frame
    pub fn queued(&self) -> usize {
        self.queue.lock().handlers.len()
    }

    /// Drop every queued handler
    pub fn clear(&self) {
        let handlers = std::mem::take(&mut self.queue.lock().handlers);
        drop(handlers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ForeignCall, HostCall};
    use crate::value::HostValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_channel() -> (HostChannel, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);
        let host: Arc<dyn ForeignCall> = Arc::new(move |call: &HostCall| -> anyhow::Result<HostValue> {
            assert_eq!(call.op, HostOp::RequestAnimationFrame);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(HostValue::Null)
        });
        (
            HostChannel::new(host, Arc::new(BridgeMetrics::new()), 0, false),
            requests,
        )
    }

    #[test]
    fn test_every_registration_requests_a_frame() {
        let (channel, requests) = counting_channel();
        let frames = FrameBridge::new();

        frames
            .request_animation_frame(&channel, Box::new(|| Ok(())))
            .unwrap();
        frames
            .request_animation_frame(&channel, Box::new(|| Ok(())))
            .unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(frames.queued(), 2);
    }

    #[test]
    fn test_run_handlers_in_order_and_empties_queue() {
        let (channel, _) = counting_channel();
        let frames = FrameBridge::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in [1, 2] {
            let order = Arc::clone(&order);
            frames
                .request_animation_frame(
                    &channel,
                    Box::new(move || {
                        order.lock().push(label);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let outcome = frames.run_handlers(&BridgeMetrics::new());
        assert_eq!(outcome.ran, 2);
        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(frames.queued(), 0);
    }

    #[test]
    fn test_failure_is_isolated() {
        let (channel, _) = counting_channel();
        let frames = FrameBridge::new();
        let ran = Arc::new(AtomicUsize::new(0));

        frames
            .request_animation_frame(&channel, Box::new(|| anyhow::bail!("bad frame")))
            .unwrap();
        {
            let ran = Arc::clone(&ran);
            frames
                .request_animation_frame(
                    &channel,
                    Box::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let outcome = frames.run_handlers(&BridgeMetrics::new());
        assert_eq!(outcome.ran, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_request_withdraws_handler() {
        let host: Arc<dyn ForeignCall> = Arc::new(|_: &HostCall| -> anyhow::Result<HostValue> {
            anyhow::bail!("no compositor")
        });
        let channel = HostChannel::new(host, Arc::new(BridgeMetrics::new()), 0, false);
        let frames = FrameBridge::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let result = frames.request_animation_frame(
            &channel,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        assert!(result.is_err());
        assert_eq!(frames.queued(), 0);
        assert_eq!(frames.run_handlers(&BridgeMetrics::new()).ran, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
