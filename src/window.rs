//! Window proxies and the origin model.
//!
//! A `Window` is the script-global object of one environment. `parent` is
//! resolved afresh on every access: the host names the parent window, and
//! the shared [`WindowRegistry`] decides whether that window is directly
//! addressable (same origin) or must be reached through a restricted
//! [`CrossOriginWindow`].

use crate::bridges::logging::{self, Console};
use crate::bridges::xhr::XmlHttpRequest;
use crate::bridges::CallbackResult;
use crate::channel::{HostChannel, HostOp};
use crate::environment::EnvInner;
use crate::error::{BridgeError, Result};
use crate::event::{DispatchOutcome, Event};
use crate::handle::{ListenerId, TimerToken, WindowHandle, WindowId};
use crate::listeners::Listener;
use crate::node::Document;
use crate::value::HostValue;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Script-side proxy for this environment's own window
#[derive(Clone)]
pub struct Window {
    env: Arc<EnvInner>,
}

impl Window {
    pub(crate) fn new(env: Arc<EnvInner>) -> Self {
        Self { env }
    }

    /// Identity of this window to the host (`window._id`)
    pub fn id(&self) -> WindowId {
        self.env.window_id
    }

    /// Key of this window's listener registry
    pub fn handle(&self) -> WindowHandle {
        self.env.window_handle
    }

    /// `document`
    pub fn document(&self) -> Document {
        Document::new(Arc::clone(&self.env))
    }

    /// `console`
    pub fn console(&self) -> Console {
        Console::new(Arc::clone(&self.env.channel), self.env.window_id)
    }

    /// `Date.now()`
    pub fn now(&self) -> Result<f64> {
        logging::now(&self.env.channel)
    }

    /// `setTimeout(callback, delay_ms)`
    pub fn set_timeout<F>(&self, callback: F, delay_ms: f64) -> Result<TimerToken>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.env.timers.set_timeout(
            &self.env.channel,
            self.env.window_id,
            Box::new(callback),
            delay_ms,
        )
    }

    /// `requestAnimationFrame(handler)`
    pub fn request_animation_frame<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        self.env
            .frames
            .request_animation_frame(&self.env.channel, Box::new(handler))
    }

    /// `new XMLHttpRequest()`
    pub fn xml_http_request(&self) -> XmlHttpRequest {
        self.env.xhr.create()
    }

    /// `window.postMessage(message, origin)` addressed to this window
    pub fn post_message(&self, message: impl Into<HostValue>, origin: &str) -> Result<()> {
        post_message(&self.env.channel, self.env.window_id, message.into(), origin)
    }

    /// Register `listener` for `event_type` on this window
    pub fn add_event_listener<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&Window, &mut Event) -> CallbackResult + Send + Sync + 'static,
    {
        self.add_listener(event_type, Arc::new(listener))
    }

    /// Register an already shared listener
    pub fn add_listener(&self, event_type: &str, listener: Listener<Window>) -> ListenerId {
        self.env
            .window_listeners
            .add(self.env.window_handle, event_type, listener)
    }

    /// Remove a registration made on this window
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.env
            .window_listeners
            .remove(self.env.window_handle, event_type, id)
    }

    /// `window.dispatchEvent(event)`: returns the default-action flag
    pub fn dispatch_event(&self, event: &mut Event) -> bool {
        self.dispatch_event_detailed(event).default_action
    }

    /// Dispatch and report every listener failure
    pub fn dispatch_event_detailed(&self, event: &mut Event) -> DispatchOutcome {
        self.env
            .window_listeners
            .dispatch(self, self.env.window_handle, event, &self.env.metrics)
    }

    /// `window.parent`, re-resolved on every call. `None` for a top-level
    /// window.
    pub fn parent(&self) -> Result<Option<ParentWindow>> {
        let reply = self
            .env
            .channel
            .call(HostOp::Parent, vec![self.env.window_id.into()])?;

        let parent_id = match reply {
            HostValue::Null => return Ok(None),
            other => other
                .as_i64()
                .map(WindowId::new)
                .ok_or_else(|| BridgeError::unexpected_reply(HostOp::Parent.as_str(), "window id or null"))?,
        };

        let same_origin = self
            .env
            .windows
            .as_ref()
            .and_then(|registry| registry.resolve(parent_id));

        Ok(Some(match same_origin {
            Some(window) => ParentWindow::SameOrigin(window),
            None => {
                debug!(window = %self.env.window_id, parent = %parent_id, "Parent is cross-origin");
                ParentWindow::CrossOrigin(CrossOriginWindow {
                    target: parent_id,
                    channel: Arc::clone(&self.env.channel),
                })
            }
        }))
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.env.window_id)
            .field("handle", &self.env.window_handle)
            .finish()
    }
}

/// Result of resolving `window.parent`
#[derive(Debug, Clone)]
pub enum ParentWindow {
    /// Lives in a registered environment; fully usable
    SameOrigin(Window),
    /// Not addressable from here; only `post_message` is available
    CrossOrigin(CrossOriginWindow),
}

impl ParentWindow {
    /// Identity as seen by script code (`-1` when cross-origin)
    pub fn id(&self) -> WindowId {
        match self {
            ParentWindow::SameOrigin(window) => window.id(),
            ParentWindow::CrossOrigin(window) => window.id(),
        }
    }

    /// Whether this is the restricted proxy
    pub fn is_cross_origin(&self) -> bool {
        matches!(self, ParentWindow::CrossOrigin(_))
    }

    /// `postMessage`, available on both kinds
    pub fn post_message(&self, message: impl Into<HostValue>, origin: &str) -> Result<()> {
        match self {
            ParentWindow::SameOrigin(window) => window.post_message(message, origin),
            ParentWindow::CrossOrigin(window) => window.post_message(message, origin),
        }
    }

    /// The same-origin window, if addressable
    pub fn as_same_origin(&self) -> Option<&Window> {
        match self {
            ParentWindow::SameOrigin(window) => Some(window),
            ParentWindow::CrossOrigin(_) => None,
        }
    }
}

/// Restricted proxy for a window in another origin.
///
/// Exposes no DOM and no listener access. Its id reads as the `-1`
/// sentinel; messages are still routed to the real window by the host.
#[derive(Clone)]
pub struct CrossOriginWindow {
    target: WindowId,
    channel: Arc<HostChannel>,
}

impl CrossOriginWindow {
    /// Always [`WindowId::CROSS_ORIGIN`]
    pub fn id(&self) -> WindowId {
        WindowId::CROSS_ORIGIN
    }

    /// `postMessage(message, origin)`
    pub fn post_message(&self, message: impl Into<HostValue>, origin: &str) -> Result<()> {
        post_message(&self.channel, self.target, message.into(), origin)
    }
}

impl fmt::Debug for CrossOriginWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossOriginWindow")
            .field("id", &WindowId::CROSS_ORIGIN)
            .finish()
    }
}

fn post_message(
    channel: &HostChannel,
    target: WindowId,
    message: HostValue,
    origin: &str,
) -> Result<()> {
    channel.call(HostOp::PostMessage, vec![target.into(), message, origin.into()])?;
    Ok(())
}

/// Maps window identities to live environments of the same origin.
///
/// Share one registry between every environment that may address the
/// others directly. Entries are weak, so a dropped environment simply stops
/// resolving.
#[derive(Default)]
pub struct WindowRegistry {
    windows: DashMap<WindowId, Weak<EnvInner>>,
}

impl WindowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, env: &Arc<EnvInner>) -> Result<()> {
        let id = env.window_id;
        if self.resolve(id).is_some() {
            return Err(BridgeError::InvalidState(format!(
                "{} is already registered",
                id
            )));
        }
        self.windows.insert(id, Arc::downgrade(env));
        Ok(())
    }

    /// Remove `id` only if it still points at `env`
    pub(crate) fn unregister(&self, env: &EnvInner) {
        self.windows.remove_if(&env.window_id, |_, weak| {
            std::ptr::eq(weak.as_ptr(), env as *const EnvInner)
        });
    }

    /// The live window registered under `id`
    pub fn resolve(&self, id: WindowId) -> Option<Window> {
        self.windows
            .get(&id)
            .and_then(|entry| entry.value().upgrade())
            .map(Window::new)
    }

    /// Whether `id` resolves to a live window
    pub fn contains(&self, id: WindowId) -> bool {
        self.resolve(id).is_some()
    }

    /// Registered windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is registered
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
