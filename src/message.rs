use crate::{
    error::Result,
    types::{EndpointId, Namespace, ENDPOINT_BROADCAST},
};
use serde::Serialize;
use std::fmt::Debug;

#[derive(Clone, PartialEq)]
pub enum FramePayload {
    String(String),
    Binary(Vec<u8>),
}

/// One message exchanged between a sender and a receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Labeled sub-protocol (channel) this frame belongs to.
    pub namespace: Namespace,

    pub source: EndpointId,
    pub destination: EndpointId,

    /// JSON text for every namespace this crate speaks; binary is passed through untouched.
    pub payload: FramePayload,
}

impl Frame {
    pub fn json<P>(namespace: impl Into<Namespace>,
                   source: EndpointId,
                   destination: EndpointId,
                   payload: &P)
    -> Result<Frame>
    where P: Serialize + ?Sized
    {
        Ok(Frame {
            namespace: namespace.into(),
            source,
            destination,
            payload: FramePayload::String(serde_json::to_string(payload)?),
        })
    }

    pub fn payload_str(&self) -> Option<&str> {
        match &self.payload {
            FramePayload::String(s) => Some(s.as_str()),
            FramePayload::Binary(_) => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == ENDPOINT_BROADCAST
    }
}

impl From<String> for FramePayload {
    fn from(s: String) -> FramePayload {
        Self::String(s)
    }
}

impl From<Vec<u8>> for FramePayload {
    fn from(b: Vec<u8>) -> FramePayload {
        Self::Binary(b)
    }
}

impl Debug for FramePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FramePayload::String(s) => {
                f.debug_struct("FramePayload::String")
                 .field("len", &s.len())
                 .finish_non_exhaustive()
            },
            FramePayload::Binary(v) => {
                f.debug_struct("FramePayload::Binary")
                 .field("len", &v.len())
                 .finish_non_exhaustive()
            },
        }
    }
}
