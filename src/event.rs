//! Event objects and dispatch results.

use crate::error::CallbackFailure;
use crate::value::HostValue;
use serde::{Deserialize, Serialize};

/// Event type fired on an XHR when its asynchronous response arrives
pub const LOAD_EVENT: &str = "load";

/// Event type of a cross-window `postMessage` delivery
pub const MESSAGE_EVENT: &str = "message";

/// An event as seen by listeners.
///
/// `do_default` starts out `true`; only [`Event::prevent_default`] clears it.
/// It is the single channel through which listeners tell the host to skip
/// its built-in default action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event type (`click`, `load`, `message`, ...)
    #[serde(rename = "type")]
    event_type: String,

    /// Whether the host should perform the default action
    #[serde(default = "default_true")]
    do_default: bool,

    /// Payload of a `message` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<HostValue>,
}

impl Event {
    /// Create a new event
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            do_default: true,
            data: None,
        }
    }

    /// A `load` event
    pub fn load() -> Self {
        Self::new(LOAD_EVENT)
    }

    /// A `message` event carrying `data`
    pub fn message(data: HostValue) -> Self {
        Self {
            data: Some(data),
            ..Self::new(MESSAGE_EVENT)
        }
    }

    /// Event type
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Message payload, if any
    pub fn data(&self) -> Option<&HostValue> {
        self.data.as_ref()
    }

    /// Suppress the host's default action
    pub fn prevent_default(&mut self) {
        self.do_default = false;
    }

    /// Whether the host should perform the default action
    pub fn do_default(&self) -> bool {
        self.do_default
    }

    /// Whether some listener called `prevent_default`
    pub fn default_prevented(&self) -> bool {
        !self.do_default
    }
}

/// Result of dispatching one event to one target
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// The event's default-action flag after every listener ran
    pub default_action: bool,

    /// Listeners invoked
    pub invoked: usize,

    /// Listeners that returned an error
    pub failures: Vec<CallbackFailure>,
}

impl DispatchOutcome {
    /// Whether every listener succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn default_true() -> bool {
    true
}
