//! The foreign call channel.
//!
//! One synchronous request/response primitive connects the script side to
//! the host. Every proxy in this crate is a thin typed wrapper around
//! [`HostChannel::call`].

use crate::error::{BridgeError, HostCallError, Result};
use crate::metrics::BridgeMetrics;
use crate::value::HostValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Operations the host implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostOp {
    /// `console.log(value)`
    #[serde(rename = "log")]
    Log,
    /// `document.querySelectorAll(selector)` -> handles
    #[serde(rename = "querySelectorAll")]
    QuerySelectorAll,
    /// `node.getAttribute(name)` -> value or null
    #[serde(rename = "getAttribute")]
    GetAttribute,
    /// `node.innerHTML = html`
    #[serde(rename = "innerHTML_set")]
    InnerHtmlSet,
    /// `node.style = css`
    #[serde(rename = "style_set")]
    StyleSet,
    /// Announce a parked timer
    #[serde(rename = "setTimeout")]
    SetTimeout,
    /// `Date.now()`
    #[serde(rename = "now")]
    Now,
    /// Ask for an animation frame
    #[serde(rename = "requestAnimationFrame")]
    RequestAnimationFrame,
    /// `window.postMessage(message, origin)`
    #[serde(rename = "postMessage")]
    PostMessage,
    /// Parent window identity or null
    #[serde(rename = "parent")]
    Parent,
    /// Perform a network request
    #[serde(rename = "XMLHttpRequest_send")]
    XmlHttpRequestSend,
}

impl HostOp {
    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            HostOp::Log => "log",
            HostOp::QuerySelectorAll => "querySelectorAll",
            HostOp::GetAttribute => "getAttribute",
            HostOp::InnerHtmlSet => "innerHTML_set",
            HostOp::StyleSet => "style_set",
            HostOp::SetTimeout => "setTimeout",
            HostOp::Now => "now",
            HostOp::RequestAnimationFrame => "requestAnimationFrame",
            HostOp::PostMessage => "postMessage",
            HostOp::Parent => "parent",
            HostOp::XmlHttpRequestSend => "XMLHttpRequest_send",
        }
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCall {
    /// Operation to perform
    pub op: HostOp,
    /// Positional arguments
    pub args: Vec<HostValue>,
}

impl HostCall {
    /// Create a new host call
    pub fn new(op: HostOp, args: Vec<HostValue>) -> Self {
        Self { op, args }
    }

    /// Argument at `index`, `Null` when missing
    pub fn arg(&self, index: usize) -> &HostValue {
        const NULL: HostValue = HostValue::Null;
        self.args.get(index).unwrap_or(&NULL)
    }
}

/// The privileged side of the bridge.
///
/// Implementations perform the real operation and answer synchronously. An
/// `Err` is reported to the script caller as a [`HostCallError`]; the bridge
/// never retries.
pub trait ForeignCall: Send + Sync {
    /// Perform one call
    fn call(&self, call: &HostCall) -> anyhow::Result<HostValue>;
}

impl<F> ForeignCall for F
where
    F: Fn(&HostCall) -> anyhow::Result<HostValue> + Send + Sync,
{
    fn call(&self, call: &HostCall) -> anyhow::Result<HostValue> {
        self(call)
    }
}

/// Typed wrapper around a host, shared by every proxy of one environment
pub struct HostChannel {
    /// The host implementation
    host: Arc<dyn ForeignCall>,
    /// Metrics sink
    metrics: Arc<BridgeMetrics>,
    /// Maximum calls (0 = unlimited)
    max_host_calls: u32,
    /// Calls issued so far
    call_count: AtomicU32,
    /// Emit a debug event per call
    trace_calls: bool,
}

impl HostChannel {
    /// Create a new channel
    pub fn new(
        host: Arc<dyn ForeignCall>,
        metrics: Arc<BridgeMetrics>,
        max_host_calls: u32,
        trace_calls: bool,
    ) -> Self {
        Self {
            host,
            metrics,
            max_host_calls,
            call_count: AtomicU32::new(0),
            trace_calls,
        }
    }

    /// Issue a call and block until the host answers
    pub fn call(&self, op: HostOp, args: Vec<HostValue>) -> Result<HostValue> {
        self.check_host_call_limit()?;

        if self.trace_calls {
            debug!(op = %op, args = args.len(), "Host call");
        }

        let call = HostCall::new(op, args);
        self.metrics.record_host_call(op.as_str());

        match self.host.call(&call) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.metrics.record_error(&crate::error::ErrorCode::HostCallFailed.to_string());
                warn!(op = %op, error = %err, "Host call failed");
                Err(HostCallError::new(op.as_str(), call.args, format!("{:#}", err)).into())
            }
        }
    }

    /// Calls issued through this channel
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    fn check_host_call_limit(&self) -> Result<()> {
        let count = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.max_host_calls > 0 && count > self.max_host_calls {
            self.call_count.fetch_sub(1, Ordering::Relaxed);
            return Err(BridgeError::ResourceLimit {
                resource: "host calls".into(),
                limit: self.max_host_calls,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn echo_host() -> Arc<dyn ForeignCall> {
        Arc::new(|call: &HostCall| -> anyhow::Result<HostValue> {
            Ok(HostValue::String(call.op.as_str().to_string()))
        })
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(HostOp::InnerHtmlSet.as_str(), "innerHTML_set");
        assert_eq!(HostOp::XmlHttpRequestSend.to_string(), "XMLHttpRequest_send");

        let json = serde_json::to_string(&HostOp::QuerySelectorAll).unwrap();
        assert_eq!(json, "\"querySelectorAll\"");
    }

    #[test]
    fn test_call_reaches_host() {
        let metrics = Arc::new(BridgeMetrics::new());
        let channel = HostChannel::new(echo_host(), Arc::clone(&metrics), 0, true);

        let reply = channel.call(HostOp::Now, vec![]).unwrap();
        assert_eq!(reply.as_str(), Some("now"));
        assert_eq!(channel.call_count(), 1);
        assert_eq!(metrics.host_calls().get("now"), Some(&1));
    }

    #[test]
    fn test_host_failure_carries_operation_and_args() {
        let host: Arc<dyn ForeignCall> =
            Arc::new(|_: &HostCall| -> anyhow::Result<HostValue> {
                anyhow::bail!("node detached")
            });
        let channel = HostChannel::new(host, Arc::new(BridgeMetrics::new()), 0, false);

        let err = channel
            .call(HostOp::GetAttribute, vec![3u64.into(), "id".into()])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HostCallFailed);
        match err {
            BridgeError::HostCall(inner) => {
                assert_eq!(inner.operation, "getAttribute");
                assert_eq!(inner.args.len(), 2);
                assert_eq!(inner.message, "node detached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_host_call_limit() {
        let channel = HostChannel::new(echo_host(), Arc::new(BridgeMetrics::new()), 2, false);

        assert!(channel.call(HostOp::Now, vec![]).is_ok()); // 1
        assert!(channel.call(HostOp::Now, vec![]).is_ok()); // 2
        let err = channel.call(HostOp::Now, vec![]).unwrap_err(); // 3 - exceeds limit
        assert_eq!(err.code(), ErrorCode::ResourceLimit);
        assert_eq!(channel.call_count(), 2);
    }

    #[test]
    fn test_missing_arg_is_null() {
        let call = HostCall::new(HostOp::Log, vec![]);
        assert!(call.arg(0).is_null());
    }
}
