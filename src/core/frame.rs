use bytes::Bytes;
use sonic_rs::Value;

use super::types::{BridgeError, BridgeResult};

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    /// Text frame from an owned string.
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<Bytes>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Frames that carry application data (as opposed to control frames).
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, WsFrame::Text(_) | WsFrame::Binary(_))
    }
}

impl WsCloseFrame {
    pub fn describe(frame: Option<&WsCloseFrame>) -> (Option<u16>, String) {
        match frame {
            Some(f) => (
                Some(f.code),
                String::from_utf8_lossy(f.reason.as_ref()).into_owned(),
            ),
            None => (None, "remote closed".to_string()),
        }
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

/// Decode an inbound bridge frame into the subscription's value.
///
/// Bridge frames carry the JSON value directly, without a sender/payload envelope.
/// Control frames yield `Ok(None)`.
pub fn decode_frame_value(frame: &WsFrame) -> BridgeResult<Option<Value>> {
    if !frame.is_data() {
        return Ok(None);
    }
    let Some(bytes) = frame_bytes(frame) else {
        return Ok(None);
    };
    sonic_rs::from_slice::<Value>(bytes)
        .map(Some)
        .map_err(|err| BridgeError::ParseFailed(err.to_string()))
}
