//! DOM node proxies.
//!
//! A `Node` is nothing but a host handle plus the environment it belongs to.
//! Reads always go back to the host; writes are fire-and-forget foreign
//! calls. Each query mints fresh proxies: two `Node`s over the same handle
//! are not deduplicated.

use crate::bridges::CallbackResult;
use crate::channel::HostOp;
use crate::environment::EnvInner;
use crate::error::{BridgeError, Result};
use crate::event::{DispatchOutcome, Event};
use crate::handle::{ListenerId, NodeHandle};
use crate::listeners::Listener;
use crate::value::HostValue;
use std::fmt;
use std::sync::Arc;

/// Script-side proxy for a host DOM node
#[derive(Clone)]
pub struct Node {
    handle: NodeHandle,
    env: Arc<EnvInner>,
}

impl Node {
    pub(crate) fn new(handle: NodeHandle, env: Arc<EnvInner>) -> Self {
        Self { handle, env }
    }

    /// Host handle of this node
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// `node.getAttribute(name)`. Always re-queries; the host's answer is
    /// returned verbatim, `None` when absent.
    pub fn get_attribute(&self, name: &str) -> Result<Option<HostValue>> {
        let reply = self
            .env
            .channel
            .call(HostOp::GetAttribute, vec![self.handle.into(), name.into()])?;
        Ok(reply.into_option())
    }

    /// `node.innerHTML = html`
    pub fn set_inner_html(&self, html: impl fmt::Display) -> Result<()> {
        self.write(HostOp::InnerHtmlSet, html.to_string())
    }

    /// `node.style = css`
    pub fn set_style(&self, css: impl fmt::Display) -> Result<()> {
        self.write(HostOp::StyleSet, css.to_string())
    }

    fn write(&self, op: HostOp, value: String) -> Result<()> {
        self.env.channel.call(
            op,
            vec![self.handle.into(), value.into(), self.env.window_id.into()],
        )?;
        Ok(())
    }

    /// Register `listener` for `event_type` on this node
    pub fn add_event_listener<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&Node, &mut Event) -> CallbackResult + Send + Sync + 'static,
    {
        self.add_listener(event_type, Arc::new(listener))
    }

    /// Register an already shared listener. Registering the same one twice
    /// makes it fire twice.
    pub fn add_listener(&self, event_type: &str, listener: Listener<Node>) -> ListenerId {
        self.env.node_listeners.add(self.handle, event_type, listener)
    }

    /// Remove a registration made on this node
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        self.env.node_listeners.remove(self.handle, event_type, id)
    }

    /// `node.dispatchEvent(event)`: returns the default-action flag
    pub fn dispatch_event(&self, event: &mut Event) -> bool {
        self.dispatch_event_detailed(event).default_action
    }

    /// Dispatch and report every listener failure
    pub fn dispatch_event_detailed(&self, event: &mut Event) -> DispatchOutcome {
        self.env
            .node_listeners
            .dispatch(self, self.handle, event, &self.env.metrics)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("handle", &self.handle)
            .field("window", &self.env.window_id)
            .finish()
    }
}

/// Script-side `document`
#[derive(Clone)]
pub struct Document {
    env: Arc<EnvInner>,
}

impl Document {
    pub(crate) fn new(env: Arc<EnvInner>) -> Self {
        Self { env }
    }

    /// `document.querySelectorAll(selector)`: one fresh proxy per handle,
    /// in the host's order
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Node>> {
        let reply = self.env.channel.call(
            HostOp::QuerySelectorAll,
            vec![selector.into(), self.env.window_id.into()],
        )?;

        let malformed =
            || BridgeError::unexpected_reply(HostOp::QuerySelectorAll.as_str(), "array of node handles");

        let handles = reply.as_array().ok_or_else(malformed)?;
        handles
            .iter()
            .map(|value| {
                value
                    .as_u64()
                    .map(|raw| Node::new(NodeHandle::new(raw), Arc::clone(&self.env)))
                    .ok_or_else(malformed)
            })
            .collect()
    }
}
