//! # Nexus DOM Bridge
//!
//! Script-side half of a host/script bridge. Script code gets typed proxies
//! (`Window`, `Document`, `Node`, `XmlHttpRequest`) for objects that really
//! live in a host; every operation on them becomes one synchronous foreign
//! call. Anything asynchronous (timers, animation frames, network responses,
//! user events) is parked locally and resumed when the host re-enters.
//!
//! ## Architecture
//!
//! ```text
//! Script code (closures)
//!     │
//!     │ Window / Document / Node / XmlHttpRequest proxies
//!     ▼
//! Environment (this crate)        ◄── runSetTimeout / runRAFHandlers /
//!     │                               runXHROnload / dispatch*Event
//!     │ HostChannel::call(op, args)
//!     ▼
//! ForeignCall host (in-process, or FramedHost over MessagePack)
//! ```
//!
//! ## Features
//!
//! - **Typed identities**: node handles, window ids and callback tokens are
//!   distinct newtypes
//! - **Per-environment registries**: no process globals; environments are
//!   `Send + Sync` and torn down on drop
//! - **Isolated callbacks**: a failing listener or frame handler is
//!   reported without stopping the rest
//! - **Origin model**: same-origin parents resolve through a shared
//!   `WindowRegistry`, others become restricted `CrossOriginWindow`s

#![deny(missing_docs)]

pub mod bridges;
pub mod channel;
pub mod codec;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod handle;
pub mod listeners;
pub mod metrics;
pub mod node;
pub mod value;
pub mod window;

// Re-export commonly used types
pub use bridges::frames::FrameOutcome;
pub use bridges::logging::{init_tracing, Console};
pub use bridges::xhr::XmlHttpRequest;
pub use bridges::{CallbackResult, FireOutcome};
pub use channel::{ForeignCall, HostCall, HostChannel, HostOp};
pub use codec::{FramedHost, HostReply, Transport};
pub use config::BridgeConfig;
pub use environment::{Environment, EnvironmentBuilder, HostReentry, ReentryOutcome};
pub use error::{BridgeError, ErrorCode, HostCallError, Result};
pub use event::{DispatchOutcome, Event};
pub use handle::{ListenerId, NodeHandle, TimerToken, WindowHandle, WindowId, XhrToken};
pub use metrics::{BridgeMetrics, BridgeStats};
pub use node::{Document, Node};
pub use value::HostValue;
pub use window::{CrossOriginWindow, ParentWindow, Window, WindowRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
