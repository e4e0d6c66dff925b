//! Script environments and host reentry.
//!
//! An `Environment` owns every registry of one window: node and window
//! listeners, parked timers, queued animation frames, and open XHRs. It is
//! created by [`EnvironmentBuilder`] and torn down when dropped. The host
//! drives all asynchrony by calling the reentry methods (or
//! [`Environment::handle_reentry`] with a decoded [`HostReentry`]).

use crate::bridges::entry_points;
use crate::bridges::frames::{FrameBridge, FrameOutcome};
use crate::bridges::logging::Console;
use crate::bridges::timers::TimerBridge;
use crate::bridges::xhr::{XhrBridge, XmlHttpRequest};
use crate::bridges::{CallbackResult, FireOutcome};
use crate::channel::{ForeignCall, HostChannel};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::event::{DispatchOutcome, Event};
use crate::handle::{NodeHandle, TimerToken, WindowHandle, WindowId, XhrToken};
use crate::listeners::ListenerRegistry;
use crate::metrics::{BridgeMetrics, BridgeStats};
use crate::node::{Document, Node};
use crate::value::HostValue;
use crate::window::{Window, WindowRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// State shared by every proxy of one environment
pub(crate) struct EnvInner {
    pub(crate) id: Uuid,
    pub(crate) window_id: WindowId,
    pub(crate) window_handle: WindowHandle,
    pub(crate) config: BridgeConfig,
    pub(crate) channel: Arc<HostChannel>,
    pub(crate) metrics: Arc<BridgeMetrics>,
    pub(crate) node_listeners: ListenerRegistry<NodeHandle, Node>,
    pub(crate) window_listeners: ListenerRegistry<WindowHandle, Window>,
    pub(crate) timers: TimerBridge,
    pub(crate) frames: FrameBridge,
    pub(crate) xhr: Arc<XhrBridge>,
    pub(crate) windows: Option<Arc<WindowRegistry>>,
}

/// A host-initiated reentry, as it arrives over a framed transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryPoint", rename_all = "camelCase")]
pub enum HostReentry {
    /// A timer expired
    #[serde(rename_all = "camelCase")]
    TimerFired {
        /// Token passed to `setTimeout`
        token: TimerToken,
    },
    /// An animation frame is due
    AnimationFrame,
    /// An asynchronous XHR completed
    #[serde(rename_all = "camelCase")]
    XhrLoaded {
        /// Response body
        body: Option<String>,
        /// Token of the request
        token: XhrToken,
    },
    /// A DOM event happened on an element
    #[serde(rename_all = "camelCase")]
    ElementEvent {
        /// Target node
        handle: NodeHandle,
        /// The event
        event: Event,
    },
    /// An event targeting the window itself
    #[serde(rename_all = "camelCase")]
    WindowEvent {
        /// The event
        event: Event,
    },
    /// A `postMessage` addressed to this window
    #[serde(rename_all = "camelCase")]
    WindowMessage {
        /// Message payload
        data: HostValue,
    },
}

impl HostReentry {
    /// Entry point name for logs and metrics
    pub fn entry_point(&self) -> &'static str {
        match self {
            HostReentry::TimerFired { .. } => entry_points::RUN_SET_TIMEOUT,
            HostReentry::AnimationFrame => entry_points::RUN_RAF_HANDLERS,
            HostReentry::XhrLoaded { .. } => entry_points::RUN_XHR_ONLOAD,
            HostReentry::ElementEvent { .. } => entry_points::DISPATCH_ELEMENT_EVENT,
            HostReentry::WindowEvent { .. } => entry_points::DISPATCH_WINDOW_EVENT,
            HostReentry::WindowMessage { .. } => entry_points::DELIVER_MESSAGE,
        }
    }
}

/// What a reentry did
#[derive(Debug)]
pub enum ReentryOutcome {
    /// Timer or XHR reentry
    Fired(FireOutcome),
    /// Animation frame pass
    Frame(FrameOutcome),
    /// Event dispatch
    Dispatched(DispatchOutcome),
}

impl ReentryOutcome {
    /// Default-action flag for dispatch reentries; `true` otherwise
    pub fn default_action(&self) -> bool {
        match self {
            ReentryOutcome::Dispatched(outcome) => outcome.default_action,
            _ => true,
        }
    }
}

/// Builder for [`Environment`]
pub struct EnvironmentBuilder {
    window_id: WindowId,
    window_handle: Option<WindowHandle>,
    host: Arc<dyn ForeignCall>,
    config: BridgeConfig,
    windows: Option<Arc<WindowRegistry>>,
}

impl EnvironmentBuilder {
    /// Start building the environment of window `window_id`
    pub fn new(window_id: WindowId, host: Arc<dyn ForeignCall>) -> Self {
        Self {
            window_id,
            window_handle: None,
            host,
            config: BridgeConfig::default(),
            windows: None,
        }
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Join a same-origin window registry
    pub fn window_registry(mut self, windows: Arc<WindowRegistry>) -> Self {
        self.windows = Some(windows);
        self
    }

    /// Key window listeners by `handle` instead of the window id
    pub fn window_handle(mut self, handle: WindowHandle) -> Self {
        self.window_handle = Some(handle);
        self
    }

    /// Validate and create the environment
    pub fn build(self) -> Result<Environment> {
        self.config.validate()?;

        let window_handle = match self.window_handle {
            Some(handle) => handle,
            None => u64::try_from(self.window_id.get())
                .map(WindowHandle::new)
                .map_err(|_| {
                    BridgeError::InvalidState(format!(
                        "{} cannot own an environment",
                        self.window_id
                    ))
                })?,
        };

        let metrics = Arc::new(BridgeMetrics::new());
        let channel = Arc::new(HostChannel::new(
            self.host,
            Arc::clone(&metrics),
            self.config.max_host_calls,
            self.config.trace_host_calls || self.config.debug,
        ));
        let retain = self.config.retain_fired_tokens;

        let inner = Arc::new(EnvInner {
            id: Uuid::new_v4(),
            window_id: self.window_id,
            window_handle,
            channel: Arc::clone(&channel),
            metrics,
            node_listeners: ListenerRegistry::new(),
            window_listeners: ListenerRegistry::new(),
            timers: TimerBridge::new(retain),
            frames: FrameBridge::new(),
            xhr: Arc::new(XhrBridge::new(channel, self.window_id, retain)),
            windows: self.windows,
            config: self.config,
        });

        if let Some(windows) = &inner.windows {
            windows.register(&inner)?;
        }

        if inner.config.debug {
            debug!(env_id = %inner.id, config = ?inner.config, "Debug mode enabled");
        }

        info!(
            env_id = %inner.id,
            window = %inner.window_id,
            retain_fired_tokens = retain,
            "Script environment created"
        );

        Ok(Environment { inner })
    }
}

/// One window's script environment
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Build an environment with default configuration
    pub fn new(window_id: WindowId, host: Arc<dyn ForeignCall>) -> Result<Self> {
        EnvironmentBuilder::new(window_id, host).build()
    }

    /// Instance id, for log correlation
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Identity of this environment's window
    pub fn window_id(&self) -> WindowId {
        self.inner.window_id
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.inner.metrics
    }

    /// `window`
    pub fn window(&self) -> Window {
        Window::new(Arc::clone(&self.inner))
    }

    /// `document`
    pub fn document(&self) -> Document {
        Document::new(Arc::clone(&self.inner))
    }

    /// `console`
    pub fn console(&self) -> Console {
        self.window().console()
    }

    /// Proxy for a host-supplied node handle
    pub fn node(&self, handle: NodeHandle) -> Node {
        Node::new(handle, Arc::clone(&self.inner))
    }

    /// `Date.now()`
    pub fn now(&self) -> Result<f64> {
        self.window().now()
    }

    /// `setTimeout(callback, delay_ms)`
    pub fn set_timeout<F>(&self, callback: F, delay_ms: f64) -> Result<TimerToken>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.window().set_timeout(callback, delay_ms)
    }

    /// `requestAnimationFrame(handler)`
    pub fn request_animation_frame<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.window().request_animation_frame(handler)
    }

    /// `new XMLHttpRequest()`
    pub fn xml_http_request(&self) -> XmlHttpRequest {
        self.inner.xhr.create()
    }

    /// Timer reentry: run the callback parked under `token`
    #[instrument(skip(self), fields(env_id = %self.inner.id))]
    pub fn run_set_timeout(&self, token: TimerToken) -> Result<FireOutcome> {
        self.inner.metrics.record_reentry(entry_points::RUN_SET_TIMEOUT);
        self.inner.timers.fire(token, &self.inner.metrics)
    }

    /// Frame reentry: run every handler queued before this call
    #[instrument(skip(self), fields(env_id = %self.inner.id))]
    pub fn run_raf_handlers(&self) -> FrameOutcome {
        self.inner.metrics.record_reentry(entry_points::RUN_RAF_HANDLERS);
        let outcome = self.inner.frames.run_handlers(&self.inner.metrics);
        debug!(ran = outcome.ran, failed = outcome.failures.len(), "Frame handlers ran");
        outcome
    }

    /// XHR reentry: deliver the asynchronous response body
    #[instrument(skip(self, body), fields(env_id = %self.inner.id))]
    pub fn run_xhr_onload(&self, body: Option<String>, token: XhrToken) -> Result<FireOutcome> {
        self.inner.metrics.record_reentry(entry_points::RUN_XHR_ONLOAD);
        self.inner.xhr.load(body, token, &self.inner.metrics)
    }

    /// Element event reentry: dispatch `event` on the node behind `handle`
    #[instrument(skip(self, event), fields(env_id = %self.inner.id, event_type = event.event_type()))]
    pub fn dispatch_element_event(&self, handle: NodeHandle, event: &mut Event) -> DispatchOutcome {
        self.inner
            .metrics
            .record_reentry(entry_points::DISPATCH_ELEMENT_EVENT);
        self.node(handle).dispatch_event_detailed(event)
    }

    /// Window event reentry
    #[instrument(skip(self, event), fields(env_id = %self.inner.id, event_type = event.event_type()))]
    pub fn dispatch_window_event(&self, event: &mut Event) -> DispatchOutcome {
        self.inner
            .metrics
            .record_reentry(entry_points::DISPATCH_WINDOW_EVENT);
        self.window().dispatch_event_detailed(event)
    }

    /// Message reentry: dispatch a `message` event carrying `data` on this
    /// window
    #[instrument(skip(self, data), fields(env_id = %self.inner.id))]
    pub fn deliver_message(&self, data: HostValue) -> DispatchOutcome {
        self.inner.metrics.record_reentry(entry_points::DELIVER_MESSAGE);
        self.window().dispatch_event_detailed(&mut Event::message(data))
    }

    /// Route a decoded reentry to its entry point
    pub fn handle_reentry(&self, reentry: HostReentry) -> Result<ReentryOutcome> {
        Ok(match reentry {
            HostReentry::TimerFired { token } => ReentryOutcome::Fired(self.run_set_timeout(token)?),
            HostReentry::AnimationFrame => ReentryOutcome::Frame(self.run_raf_handlers()),
            HostReentry::XhrLoaded { body, token } => {
                ReentryOutcome::Fired(self.run_xhr_onload(body, token)?)
            }
            HostReentry::ElementEvent { handle, mut event } => {
                ReentryOutcome::Dispatched(self.dispatch_element_event(handle, &mut event))
            }
            HostReentry::WindowEvent { mut event } => {
                ReentryOutcome::Dispatched(self.dispatch_window_event(&mut event))
            }
            HostReentry::WindowMessage { data } => {
                ReentryOutcome::Dispatched(self.deliver_message(data))
            }
        })
    }

    /// Whether any node or the window listens for `event_type`
    pub fn is_listening(&self, event_type: &str) -> bool {
        self.inner.node_listeners.is_listening(event_type)
            || self.inner.window_listeners.is_listening(event_type)
    }

    /// Snapshot of registry sizes
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            pending_timers: self.inner.timers.pending(),
            timers_minted: self.inner.timers.minted(),
            queued_frames: self.inner.frames.queued(),
            open_requests: self.inner.xhr.open_requests(),
            requests_minted: self.inner.xhr.minted(),
            node_listener_targets: self.inner.node_listeners.target_count(),
            window_listener_targets: self.inner.window_listeners.target_count(),
            host_calls: self.inner.channel.call_count(),
        }
    }

    /// Metrics in Prometheus text format, using the configured prefix
    pub fn prometheus(&self) -> String {
        self.inner
            .metrics
            .to_prometheus(&self.inner.config.metrics_prefix)
    }

    /// Drop every registry entry and leave the window registry.
    ///
    /// Proxies still held by the caller stay usable for foreign calls, but
    /// nothing parked before teardown will run.
    pub fn teardown(&self) {
        self.inner.node_listeners.clear();
        self.inner.window_listeners.clear();
        self.inner.timers.clear();
        self.inner.frames.clear();
        self.inner.xhr.clear();
        if let Some(windows) = &self.inner.windows {
            windows.unregister(&self.inner);
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.id)
            .field("window_id", &self.inner.window_id)
            .field("window_handle", &self.inner.window_handle)
            .finish()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
        info!(env_id = %self.inner.id, window = %self.inner.window_id, "Script environment destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HostCall;
    use crate::error::ErrorCode;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_host() -> Arc<dyn ForeignCall> {
        Arc::new(|_: &HostCall| -> anyhow::Result<HostValue> { Ok(HostValue::Null) })
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = EnvironmentBuilder::new(WindowId::new(1), quiet_host())
            .config(BridgeConfig::new().with_metrics_prefix("9bad"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_negative_window_id_needs_explicit_handle() {
        let err = Environment::new(WindowId::CROSS_ORIGIN, quiet_host()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);

        let env = EnvironmentBuilder::new(WindowId::new(-5), quiet_host())
            .window_handle(WindowHandle::new(5))
            .build()
            .unwrap();
        assert_eq!(env.window().handle(), WindowHandle::new(5));
    }

    #[test]
    fn test_environments_are_isolated() {
        let first = Environment::new(WindowId::new(1), quiet_host()).unwrap();
        let second = Environment::new(WindowId::new(2), quiet_host()).unwrap();
        assert_ne!(first.id(), second.id());

        first
            .node(NodeHandle::new(1))
            .add_event_listener("click", |_, event| {
                event.prevent_default();
                Ok(())
            });

        assert!(first.is_listening("click"));
        assert!(!second.is_listening("click"));
        assert!(second
            .dispatch_element_event(NodeHandle::new(1), &mut Event::new("click"))
            .default_action);
    }

    #[test]
    fn test_timer_callback_may_schedule_another() {
        let env = Environment::new(WindowId::new(1), quiet_host()).unwrap();
        let window = env.window();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = {
            let fired = Arc::clone(&fired);
            env.set_timeout(
                move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                    window.set_timeout(|| Ok(()), 5.0)?;
                    Ok(())
                },
                5.0,
            )
            .unwrap()
        };

        assert_eq!(env.run_set_timeout(first).unwrap(), FireOutcome::Ran);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(env.stats().pending_timers, 1);
        assert_eq!(env.stats().timers_minted, 2);
    }

    #[test]
    fn test_deliver_message_dispatches_message_event() {
        let env = Environment::new(WindowId::new(1), quiet_host()).unwrap();
        let received = Arc::new(Mutex::new(None));
        {
            let received = Arc::clone(&received);
            env.window().add_event_listener("message", move |this, event| {
                assert_eq!(this.id(), WindowId::new(1));
                *received.lock() = event.data().cloned();
                Ok(())
            });
        }

        let outcome = env.deliver_message("ping".into());
        assert_eq!(outcome.invoked, 1);
        assert_eq!(received.lock().clone(), Some(HostValue::from("ping")));
    }

    #[test]
    fn test_handle_reentry_routes_and_counts() {
        let env = Environment::new(WindowId::new(1), quiet_host()).unwrap();
        env.node(NodeHandle::new(7))
            .add_event_listener("submit", |_, event| {
                event.prevent_default();
                Ok(())
            });

        let outcome = env
            .handle_reentry(HostReentry::ElementEvent {
                handle: NodeHandle::new(7),
                event: Event::new("submit"),
            })
            .unwrap();
        assert!(!outcome.default_action());

        let outcome = env.handle_reentry(HostReentry::AnimationFrame).unwrap();
        assert!(matches!(outcome, ReentryOutcome::Frame(ref f) if f.ran == 0));

        let err = env
            .handle_reentry(HostReentry::TimerFired {
                token: TimerToken::new(0),
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownToken);

        let reentries = env.metrics().reentries();
        assert_eq!(reentries.get(entry_points::DISPATCH_ELEMENT_EVENT), Some(&1));
        assert_eq!(reentries.get(entry_points::RUN_RAF_HANDLERS), Some(&1));
        assert_eq!(reentries.get(entry_points::RUN_SET_TIMEOUT), Some(&1));
    }

    #[test]
    fn test_reentry_json_shape() {
        let reentry: HostReentry = serde_json::from_str(
            r#"{ "entryPoint": "xhrLoaded", "body": "ok", "token": 3 }"#,
        )
        .unwrap();
        assert_eq!(
            reentry,
            HostReentry::XhrLoaded {
                body: Some("ok".to_string()),
                token: XhrToken::new(3),
            }
        );
        assert_eq!(reentry.entry_point(), entry_points::RUN_XHR_ONLOAD);
    }

    #[test]
    fn test_teardown_clears_registries() {
        let env = Environment::new(WindowId::new(1), quiet_host()).unwrap();
        env.set_timeout(|| Ok(()), 1.0).unwrap();
        env.request_animation_frame(|| Ok(())).unwrap();
        let _xhr = env.xml_http_request();
        env.window().add_event_listener("load", |_, _| Ok(()));

        env.teardown();
        let stats = env.stats();
        assert_eq!(stats.pending_timers, 0);
        assert_eq!(stats.queued_frames, 0);
        assert_eq!(stats.open_requests, 0);
        assert_eq!(stats.window_listener_targets, 0);
        // Counters survive so tokens are never reused
        assert_eq!(stats.timers_minted, 1);
    }

    #[test]
    fn test_teardown_releases_host_held_by_self_capturing_onload() {
        let host_alive = Arc::new(());
        let watch = Arc::downgrade(&host_alive);
        let host: Arc<dyn ForeignCall> = Arc::new(move |_: &HostCall| -> anyhow::Result<HostValue> {
            let _ = &host_alive;
            Ok(HostValue::Null)
        });

        let env = Environment::new(WindowId::new(1), host).unwrap();
        let xhr = env.xml_http_request();
        xhr.open("GET", "/poll", true);
        let captured = xhr.clone();
        xhr.set_onload(move |_, _| {
            let _ = &captured;
            Ok(())
        });
        xhr.send(HostValue::Null).unwrap();

        env.teardown();
        drop(env);
        drop(xhr);
        assert!(watch.upgrade().is_none());
    }

    #[test]
    fn test_stats_and_prometheus() {
        let env = EnvironmentBuilder::new(WindowId::new(1), quiet_host())
            .config(BridgeConfig::new().with_metrics_prefix("dom"))
            .build()
            .unwrap();
        env.console().log("hello").unwrap();

        assert_eq!(env.stats().host_calls, 1);
        assert!(env.prometheus().contains("dom_host_calls_total"));
    }
}
