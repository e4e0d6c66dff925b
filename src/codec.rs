//! MessagePack framing for hosts that live across a byte boundary.
//!
//! In-process hosts implement [`ForeignCall`] directly. Hosts behind a pipe,
//! socket or FFI buffer implement [`Transport`] instead and get wrapped in a
//! [`FramedHost`]. Frames are named-field MessagePack so the tagged enums
//! survive the round trip.

use crate::channel::{ForeignCall, HostCall};
use crate::environment::HostReentry;
use crate::error::Result;
use crate::value::HostValue;
use serde::{Deserialize, Serialize};

/// The host's answer to one [`HostCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostReply {
    /// The call succeeded
    Ok(HostValue),
    /// The call failed with this message
    Err(String),
}

impl HostReply {
    /// Convert into the host seam's result type
    pub fn into_result(self) -> anyhow::Result<HostValue> {
        match self {
            HostReply::Ok(value) => Ok(value),
            HostReply::Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

impl From<anyhow::Result<HostValue>> for HostReply {
    fn from(result: anyhow::Result<HostValue>) -> Self {
        match result {
            Ok(value) => HostReply::Ok(value),
            Err(err) => HostReply::Err(format!("{:#}", err)),
        }
    }
}

/// Encode a call frame
pub fn encode_call(call: &HostCall) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(call)?)
}

/// Decode a call frame
pub fn decode_call(bytes: &[u8]) -> Result<HostCall> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a reply frame
pub fn encode_reply(reply: &HostReply) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(reply)?)
}

/// Decode a reply frame
pub fn decode_reply(bytes: &[u8]) -> Result<HostReply> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a reentry frame
pub fn encode_reentry(reentry: &HostReentry) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(reentry)?)
}

/// Decode a reentry frame
pub fn decode_reentry(bytes: &[u8]) -> Result<HostReentry> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// A synchronous byte-level round trip to the host
pub trait Transport: Send + Sync {
    /// Send one request frame and block for the reply frame
    fn round_trip(&self, request: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a [`Transport`] into a [`ForeignCall`]
pub struct FramedHost<T> {
    transport: T,
}

impl<T: Transport> FramedHost<T> {
    /// Wrap `transport`
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The wrapped transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> ForeignCall for FramedHost<T> {
    fn call(&self, call: &HostCall) -> anyhow::Result<HostValue> {
        let request = encode_call(call)?;
        let response = self.transport.round_trip(&request)?;
        decode_reply(&response)?.into_result()
    }
}
