//! Deferred callback bridges.
//!
//! Each bridge parks script callbacks under a locally minted token (or in a
//! queue) and hands control back to the script immediately. The host later
//! re-enters through a named entry point and the parked callback runs to
//! completion.

pub mod frames;
pub mod logging;
pub mod timers;
pub mod xhr;

/// What every script callback returns. An `Err` is the script-side
/// equivalent of a thrown exception.
pub type CallbackResult = anyhow::Result<()>;

/// What a token-addressed reentry did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The parked callback ran
    Ran,
    /// The token was already used; nothing ran
    AlreadyFired,
    /// The token's callback was dropped by teardown; nothing ran
    Cleared,
}

/// Reentry entry point names, as used in logs and metrics
pub mod entry_points {
    /// Timer expiry
    pub const RUN_SET_TIMEOUT: &str = "runSetTimeout";
    /// Animation frame
    pub const RUN_RAF_HANDLERS: &str = "runRAFHandlers";
    /// Asynchronous XHR completion
    pub const RUN_XHR_ONLOAD: &str = "runXHROnload";
    /// Host-side DOM event on an element
    pub const DISPATCH_ELEMENT_EVENT: &str = "dispatchElementEvent";
    /// Host-side event on the window
    pub const DISPATCH_WINDOW_EVENT: &str = "dispatchWindowEvent";
    /// Incoming `postMessage`
    pub const DELIVER_MESSAGE: &str = "deliverMessage";
}
