//! Console and clock globals, plus tracing setup.
//!
//! `console.log` is forwarded to the host and mirrored to `tracing`.
//! `Date.now` reads the host clock so script time matches host scheduling.

use crate::channel::{HostChannel, HostOp};
use crate::error::{BridgeError, Result};
use crate::handle::WindowId;
use crate::value::HostValue;
use std::sync::Arc;

/// Default filter directive for [`init_tracing`]
pub const DEFAULT_DIRECTIVE: &str = "nexus_dom_bridge=info";

/// Script-side `console`
#[derive(Clone)]
pub struct Console {
    channel: Arc<HostChannel>,
    window: WindowId,
}

impl Console {
    /// Create a console writing through `channel`
    pub fn new(channel: Arc<HostChannel>, window: WindowId) -> Self {
        Self { channel, window }
    }

    /// `console.log(value)`
    pub fn log(&self, value: impl Into<HostValue>) -> Result<()> {
        let value = value.into();
        tracing::debug!(window = %self.window, "console.log: {}", value);
        self.channel.call(HostOp::Log, vec![value])?;
        Ok(())
    }
}

/// `Date.now()`: host time in milliseconds
pub fn now(channel: &HostChannel) -> Result<f64> {
    let reply = channel.call(HostOp::Now, vec![])?;
    reply
        .as_number()
        .ok_or_else(|| BridgeError::unexpected_reply(HostOp::Now.as_str(), "number"))
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let directive: tracing_subscriber::filter::Directive = default_directive
        .parse()
        .map_err(|e| BridgeError::General(format!("invalid log directive: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| BridgeError::General(format!("failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ForeignCall, HostCall};
    use crate::error::ErrorCode;
    use crate::metrics::BridgeMetrics;
    use parking_lot::Mutex;

    fn channel(reply: HostValue, seen: Arc<Mutex<Vec<HostCall>>>) -> Arc<HostChannel> {
        let host: Arc<dyn ForeignCall> = Arc::new(move |call: &HostCall| -> anyhow::Result<HostValue> {
            seen.lock().push(call.clone());
            Ok(reply.clone())
        });
        Arc::new(HostChannel::new(host, Arc::new(BridgeMetrics::new()), 0, false))
    }

    #[test]
    fn test_console_log_forwards_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let console = Console::new(channel(HostValue::Null, Arc::clone(&seen)), WindowId::new(1));

        console.log("hello").unwrap();
        console.log(3u64).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].op, HostOp::Log);
        assert_eq!(seen[0].arg(0).as_str(), Some("hello"));
        assert_eq!(seen[1].arg(0).as_number(), Some(3.0));
    }

    #[test]
    fn test_now_reads_host_clock() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let channel = channel(HostValue::Number(1234.5), seen);
        assert_eq!(now(&channel).unwrap(), 1234.5);
    }

    #[test]
    fn test_now_rejects_non_number() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let channel = channel("soon".into(), seen);
        assert_eq!(now(&channel).unwrap_err().code(), ErrorCode::UnexpectedReply);
    }

    #[test]
    fn test_init_tracing_installs_once() {
        let _ = init_tracing(DEFAULT_DIRECTIVE);
        assert!(init_tracing(DEFAULT_DIRECTIVE).is_err());
    }
}
