//! `NODE_HANDLE` control message codec.
//!
//! A control message travels in the same chunk as the descriptor it
//! describes and tells the receiver what kind of handle to build.
//!
//! # Example
//!
//! ```
//! use handoff_pipe::control::{ControlMessage, HandleType};
//!
//! let json = ControlMessage::node_handle(HandleType::Socket).to_json().unwrap();
//! assert_eq!(json, r#"{"cmd":"NODE_HANDLE","type":"net.Socket"}"#);
//!
//! let msg = ControlMessage::decode(json.as_bytes()).unwrap();
//! assert_eq!(msg.handle_type(), HandleType::Socket);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Command tag announcing that a handle accompanies the chunk.
pub const NODE_HANDLE: &str = "NODE_HANDLE";

/// Type name for a transferred TCP socket.
pub const NET_SOCKET: &str = "net.Socket";

/// Type name for a transferred native connection handle.
pub const NET_NATIVE: &str = "net.Native";

/// Kind of handle a control message asks the receiver to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    /// `net.Socket`
    Socket,
    /// `net.Native`
    Native,
    /// Any type name this side does not know. Yields no handle.
    Unknown,
}

impl HandleType {
    /// Wire name, `None` for [`HandleType::Unknown`].
    pub fn name(&self) -> Option<&'static str> {
        match self {
            HandleType::Socket => Some(NET_SOCKET),
            HandleType::Native => Some(NET_NATIVE),
            HandleType::Unknown => None,
        }
    }

    /// Whether a handle can be constructed for this type.
    #[inline]
    pub fn is_known(&self) -> bool {
        !matches!(self, HandleType::Unknown)
    }
}

impl From<&str> for HandleType {
    fn from(name: &str) -> Self {
        match name {
            NET_SOCKET => HandleType::Socket,
            NET_NATIVE => HandleType::Native,
            _ => HandleType::Unknown,
        }
    }
}

/// Decoded control record.
///
/// Extra fields sent by the peer are ignored. A missing `cmd` decodes to an
/// empty command, which is simply not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Command tag; only [`NODE_HANDLE`] is acted upon.
    #[serde(default)]
    pub cmd: String,
    /// Handle type name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ControlMessage {
    /// Build a `NODE_HANDLE` message for the given handle type.
    pub fn node_handle(kind: HandleType) -> Self {
        Self {
            cmd: NODE_HANDLE.to_string(),
            kind: kind.name().map(str::to_string),
        }
    }

    /// Decode a control message from raw chunk bytes.
    ///
    /// The bytes must be UTF-8; surrounding whitespace is trimmed before the
    /// JSON parse. The message must be complete: there is no reassembly
    /// across chunks.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether `cmd` is [`NODE_HANDLE`].
    #[inline]
    pub fn is_node_handle(&self) -> bool {
        self.cmd == NODE_HANDLE
    }

    /// Handle type this message requests.
    ///
    /// Anything other than a `NODE_HANDLE` command with a known type maps to
    /// [`HandleType::Unknown`].
    pub fn handle_type(&self) -> HandleType {
        if !self.is_node_handle() {
            return HandleType::Unknown;
        }
        self.kind
            .as_deref()
            .map(HandleType::from)
            .unwrap_or(HandleType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandoffError;

    #[test]
    fn test_handle_type_from_name() {
        assert_eq!(HandleType::from("net.Socket"), HandleType::Socket);
        assert_eq!(HandleType::from("net.Native"), HandleType::Native);
        assert_eq!(HandleType::from("dgram.Socket"), HandleType::Unknown);
        assert_eq!(HandleType::from(""), HandleType::Unknown);
    }

    #[test]
    fn test_node_handle_json() {
        let json = ControlMessage::node_handle(HandleType::Native)
            .to_json()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["cmd"], "NODE_HANDLE");
        assert_eq!(parsed["type"], "net.Native");
    }

    #[test]
    fn test_unknown_type_omits_type_field() {
        let json = ControlMessage::node_handle(HandleType::Unknown)
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"cmd":"NODE_HANDLE"}"#);
    }

    #[test]
    fn test_decode_trims_whitespace() {
        let msg = ControlMessage::decode(b"  {\"cmd\":\"NODE_HANDLE\",\"type\":\"net.Socket\"}\n")
            .unwrap();
        assert!(msg.is_node_handle());
        assert_eq!(msg.handle_type(), HandleType::Socket);
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = ControlMessage::decode(
            br#"{"cmd":"NODE_HANDLE","type":"net.Socket","msg":{"hello":1},"key":"k"}"#,
        )
        .unwrap();
        assert_eq!(msg.handle_type(), HandleType::Socket);
    }

    #[test]
    fn test_other_command_requests_nothing() {
        let msg = ControlMessage::decode(br#"{"cmd":"OTHER","type":"net.Socket"}"#).unwrap();
        assert!(!msg.is_node_handle());
        assert_eq!(msg.handle_type(), HandleType::Unknown);
    }

    #[test]
    fn test_missing_cmd_is_not_node_handle() {
        let msg = ControlMessage::decode(br#"{"type":"net.Socket"}"#).unwrap();
        assert_eq!(msg.cmd, "");
        assert_eq!(msg.handle_type(), HandleType::Unknown);
    }

    #[test]
    fn test_missing_type_is_unknown() {
        let msg = ControlMessage::decode(br#"{"cmd":"NODE_HANDLE"}"#).unwrap();
        assert!(msg.is_node_handle());
        assert_eq!(msg.handle_type(), HandleType::Unknown);
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = ControlMessage::decode(br#"{"cmd":"NODE_HA"#).unwrap_err();
        assert!(matches!(err, HandoffError::ControlJson(_)));
    }

    #[test]
    fn test_decode_empty_payload_fails() {
        let err = ControlMessage::decode(b"   ").unwrap_err();
        assert!(matches!(err, HandoffError::ControlJson(_)));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = ControlMessage::decode(&[0x7b, 0xff, 0xfe, 0x7d]).unwrap_err();
        assert!(matches!(err, HandoffError::ControlUtf8(_)));
    }
}
