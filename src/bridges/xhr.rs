//! XMLHttpRequest bridge.
//!
//! A request is registered under a fresh `XhrToken` when it is constructed.
//! `open` only records parameters. `send` issues one `XMLHttpRequest_send`
//! call; a synchronous request gets its body as the reply, an asynchronous
//! one gets it later through the `runXHROnload` reentry.

use super::{CallbackResult, FireOutcome};
use crate::channel::{HostChannel, HostOp};
use crate::error::{BridgeError, CallbackFailure, CallbackSite, Result};
use crate::event::Event;
use crate::handle::{Claim, Token, TokenTable, WindowId, XhrToken};
use crate::metrics::BridgeMetrics;
use crate::value::HostValue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// `onload` handler. Receives the request as `this`.
pub type XhrOnload = Arc<dyn Fn(&XmlHttpRequest, &mut Event) -> CallbackResult + Send + Sync>;

#[derive(Default)]
struct XhrState {
    method: Option<String>,
    url: Option<String>,
    is_async: bool,
    body: HostValue,
    response_text: Option<String>,
    onload: Option<XhrOnload>,
}

/// Registry of XHR objects for one environment
pub struct XhrBridge {
    table: Mutex<TokenTable<XhrToken, Arc<Mutex<XhrState>>>>,
    channel: Arc<HostChannel>,
    window: WindowId,
    retain_loaded: bool,
}

impl XhrBridge {
    /// Create a bridge sending through `channel` on behalf of `window`
    pub fn new(channel: Arc<HostChannel>, window: WindowId, retain_loaded: bool) -> Self {
        Self {
            table: Mutex::new(TokenTable::new()),
            channel,
            window,
            retain_loaded,
        }
    }

    /// Construct a request and register it under a fresh token
    pub fn create(self: &Arc<Self>) -> XmlHttpRequest {
        let state = Arc::new(Mutex::new(XhrState::default()));
        let token = self.table.lock().mint(Arc::clone(&state));
        XmlHttpRequest {
            token,
            state,
            bridge: Arc::clone(self),
        }
    }

    /// Complete the asynchronous request registered under `token`.
    ///
    /// Assigns `responseText` first, then runs `onload` (if set) with a
    /// `load` event. A token loads at most once.
    pub fn load(
        self: &Arc<Self>,
        body: Option<String>,
        token: XhrToken,
        metrics: &BridgeMetrics,
    ) -> Result<FireOutcome> {
        let claim = self.table.lock().claim(token, self.retain_loaded);

        let state = match claim {
            Claim::Ready(state) => state,
            Claim::Spent => {
                warn!(token = %token, "Request already loaded, ignoring repeated signal");
                metrics.record_duplicate_reentry();
                return Ok(FireOutcome::AlreadyFired);
            }
            Claim::Cleared => {
                debug!(token = %token, "Request dropped by teardown, ignoring load");
                return Ok(FireOutcome::Cleared);
            }
            Claim::Unknown => {
                return Err(BridgeError::UnknownToken {
                    kind: XhrToken::KIND,
                    token: token.raw(),
                })
            }
        };

        // The handler is taken out: a loaded token never loads again, and a
        // handler capturing its own request would otherwise keep it alive.
        let onload = {
            let mut state = state.lock();
            state.response_text = body;
            state.onload.take()
        };

        let Some(onload) = onload else {
            debug!(token = %token, "Request loaded without onload handler");
            return Ok(FireOutcome::Ran);
        };

        let this = XmlHttpRequest {
            token,
            state,
            bridge: Arc::clone(self),
        };
        let mut event = Event::load();
        onload(&this, &mut event).map_err(|error| {
            metrics.record_callback_failure();
            BridgeError::from(CallbackFailure::new(CallbackSite::XhrLoad, 0, error))
        })?;

        Ok(FireOutcome::Ran)
    }

    /// Requests not yet loaded
    pub fn open_requests(&self) -> usize {
        self.table.lock().parked()
    }

    /// Tokens ever minted
    pub fn minted(&self) -> u64 {
        self.table.lock().minted()
    }

    /// Drop every registered request and detach pending `onload` handlers
    pub fn clear(&self) {
        let parked = self.table.lock().drain();
        for state in parked {
            let onload = state.lock().onload.take();
            drop(onload);
        }
    }

    /// Retire a request that completed synchronously
    fn complete(&self, token: XhrToken) {
        let claim = self.table.lock().claim(token, self.retain_loaded);
        drop(claim);
    }
}

/// Script-side XMLHttpRequest proxy
#[derive(Clone)]
pub struct XmlHttpRequest {
    token: XhrToken,
    state: Arc<Mutex<XhrState>>,
    bridge: Arc<XhrBridge>,
}

impl XmlHttpRequest {
    /// Token naming this request to the host
    pub fn token(&self) -> XhrToken {
        self.token
    }

    /// Record request parameters. No foreign call is made.
    pub fn open(&self, method: impl Into<String>, url: impl Into<String>, is_async: bool) {
        let mut state = self.state.lock();
        state.method = Some(method.into());
        state.url = Some(url.into());
        state.is_async = is_async;
    }

    /// Send the request.
    ///
    /// For a synchronous request the host's reply is the response body and
    /// is assigned to `responseText` before this returns.
    pub fn send(&self, body: impl Into<HostValue>) -> Result<()> {
        let body = body.into();
        let (method, url, is_async) = {
            let mut state = self.state.lock();
            let (Some(method), Some(url)) = (state.method.clone(), state.url.clone()) else {
                return Err(BridgeError::InvalidState(format!(
                    "{} sent before open",
                    self.token
                )));
            };
            state.body = body.clone();
            (method, url, state.is_async)
        };

        // No lock held: the host may re-enter with the load signal
        let reply = self.bridge.channel.call(
            HostOp::XmlHttpRequestSend,
            vec![
                method.into(),
                url.into(),
                body,
                is_async.into(),
                self.token.into(),
                self.bridge.window.into(),
            ],
        )?;

        if is_async {
            return Ok(());
        }

        let text = match reply {
            HostValue::String(text) => Some(text),
            HostValue::Null => None,
            _ => {
                return Err(BridgeError::unexpected_reply(
                    HostOp::XmlHttpRequestSend.as_str(),
                    "response body string or null",
                ))
            }
        };
        let onload = {
            let mut state = self.state.lock();
            state.response_text = text;
            state.onload.take()
        };
        drop(onload);

        // A synchronous request never sees a load signal
        self.bridge.complete(self.token);
        Ok(())
    }

    /// Install the `onload` handler
    pub fn set_onload<F>(&self, handler: F)
    where
        F: Fn(&XmlHttpRequest, &mut Event) -> CallbackResult + Send + Sync + 'static,
    {
        self.state.lock().onload = Some(Arc::new(handler));
    }

    /// Remove the `onload` handler
    pub fn clear_onload(&self) {
        self.state.lock().onload = None;
    }

    /// Response body, once available
    pub fn response_text(&self) -> Option<String> {
        self.state.lock().response_text.clone()
    }

    /// Method passed to `open`
    pub fn method(&self) -> Option<String> {
        self.state.lock().method.clone()
    }

    /// URL passed to `open`
    pub fn url(&self) -> Option<String> {
        self.state.lock().url.clone()
    }

    /// Whether the request was opened asynchronous
    pub fn is_async(&self) -> bool {
        self.state.lock().is_async
    }

    /// Body passed to the last `send`
    pub fn body(&self) -> HostValue {
        self.state.lock().body.clone()
    }
}

impl fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("XmlHttpRequest")
            .field("token", &self.token)
            .field("method", &state.method)
            .field("url", &state.url)
            .field("is_async", &state.is_async)
            .field("has_onload", &state.onload.is_some())
            .finish()
    }
}
