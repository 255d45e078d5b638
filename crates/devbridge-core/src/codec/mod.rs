//! Envelope codec for the debug endpoint.
//!
//! Every frame on the debug endpoint is a protobuf [`proto::DebugMessage`]
//! whose `data` field holds a category-specific inner message. The bridge
//! only needs the devtools categories, whose inner message carries a CDP
//! payload string.

pub mod proto;

use std::fmt;

use prost::Message as _;
use thiserror::Error;

use proto::{DebugMessage, DevtoolsPayload};

/// Compression algorithm id for uncompressed data.
pub const COMPRESS_NONE: i32 = 0;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed protobuf: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unsupported compression algorithm {0}")]
    UnsupportedCompression(i32),
}

/// Envelope category tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// CDP commands sent from the inspector to the runtime.
    ChromeDevtools,
    /// CDP responses and events sent from the runtime to the inspector.
    ChromeDevtoolsResult,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::ChromeDevtools => "chromeDevtools",
            Category::ChromeDevtoolsResult => "chromeDevtoolsResult",
            Category::Other(name) => name,
        }
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        match value {
            "chromeDevtools" => Category::ChromeDevtools,
            "chromeDevtoolsResult" => Category::ChromeDevtoolsResult,
            other => Category::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded debug endpoint frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEnvelope {
    pub sequence: u32,
    pub category: Category,
    pub data: Vec<u8>,
    pub compress_algo: i32,
    pub original_size: u32,
}

/// Inner payload ready to be placed in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPayload {
    pub buffer: Vec<u8>,
    pub original_size: u32,
}

impl WrappedPayload {
    /// Build the outbound envelope for this payload.
    pub fn into_envelope(self, sequence: u32, category: Category) -> DebugEnvelope {
        DebugEnvelope {
            sequence,
            category,
            data: self.buffer,
            compress_algo: COMPRESS_NONE,
            original_size: self.original_size,
        }
    }
}

/// Serialization of envelopes and their inner payloads.
pub trait PayloadCodec: Send + Sync {
    fn decode_envelope(&self, frame: &[u8]) -> Result<DebugEnvelope, CodecError>;

    fn encode_envelope(&self, envelope: &DebugEnvelope) -> Vec<u8>;

    /// Extract the CDP payload carried by a devtools envelope.
    fn unwrap_payload(&self, envelope: &DebugEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Wrap a raw CDP payload for a devtools envelope.
    fn wrap_payload(&self, payload: &[u8], op_id: u32) -> WrappedPayload;
}

/// [`PayloadCodec`] backed by the prost messages in [`proto`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl PayloadCodec for ProtobufCodec {
    fn decode_envelope(&self, frame: &[u8]) -> Result<DebugEnvelope, CodecError> {
        let message = DebugMessage::decode(frame)?;
        Ok(DebugEnvelope {
            sequence: message.seq,
            category: Category::from(message.category.as_str()),
            data: message.data,
            compress_algo: message.compress_algo,
            original_size: message.original_size,
        })
    }

    fn encode_envelope(&self, envelope: &DebugEnvelope) -> Vec<u8> {
        DebugMessage {
            seq: envelope.sequence,
            category: envelope.category.as_str().to_string(),
            data: envelope.data.clone(),
            compress_algo: envelope.compress_algo,
            original_size: envelope.original_size,
        }
        .encode_to_vec()
    }

    fn unwrap_payload(&self, envelope: &DebugEnvelope) -> Result<Vec<u8>, CodecError> {
        if envelope.compress_algo != COMPRESS_NONE {
            return Err(CodecError::UnsupportedCompression(envelope.compress_algo));
        }
        let inner = DevtoolsPayload::decode(envelope.data.as_slice())?;
        Ok(inner.payload.into_bytes())
    }

    fn wrap_payload(&self, payload: &[u8], op_id: u32) -> WrappedPayload {
        let buffer = DevtoolsPayload {
            jscontext_id: String::new(),
            op_id,
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
        .encode_to_vec();
        let original_size = buffer.len() as u32;
        WrappedPayload {
            buffer,
            original_size,
        }
    }
}

/// Hex rendering of a frame for trace logs, truncated to `limit` bytes.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out: String = bytes
        .iter()
        .take(limit)
        .map(|b| format!("{:02x}", b))
        .collect();
    if bytes.len() > limit {
        out.push_str(&format!("... ({} bytes)", bytes.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_frame(payload: &str, compress_algo: i32) -> Vec<u8> {
        let inner = DevtoolsPayload {
            jscontext_id: "ctx-1".to_string(),
            op_id: 7,
            payload: payload.to_string(),
        }
        .encode_to_vec();
        DebugMessage {
            seq: 3,
            category: "chromeDevtoolsResult".to_string(),
            original_size: inner.len() as u32,
            data: inner,
            compress_algo,
        }
        .encode_to_vec()
    }

    #[test]
    fn test_category_from_wire() {
        assert_eq!(Category::from("chromeDevtools"), Category::ChromeDevtools);
        assert_eq!(
            Category::from("chromeDevtoolsResult"),
            Category::ChromeDevtoolsResult
        );
        assert_eq!(
            Category::from("setupContext"),
            Category::Other("setupContext".to_string())
        );
        assert_eq!(Category::Other("x".to_string()).to_string(), "x");
    }

    #[test]
    fn test_decode_and_unwrap_result() {
        let codec = ProtobufCodec;
        let envelope = codec
            .decode_envelope(&result_frame(r#"{"id":1,"result":{}}"#, 0))
            .unwrap();
        assert_eq!(envelope.sequence, 3);
        assert_eq!(envelope.category, Category::ChromeDevtoolsResult);

        let payload = codec.unwrap_payload(&envelope).unwrap();
        assert_eq!(payload, br#"{"id":1,"result":{}}"#);
    }

    #[test]
    fn test_unwrap_rejects_compressed_data() {
        let codec = ProtobufCodec;
        let envelope = codec.decode_envelope(&result_frame("{}", 2)).unwrap();
        assert!(matches!(
            codec.unwrap_payload(&envelope),
            Err(CodecError::UnsupportedCompression(2))
        ));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = ProtobufCodec;
        assert!(codec.decode_envelope(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_wrap_sets_original_size() {
        let codec = ProtobufCodec;
        let wrapped = codec.wrap_payload(br#"{"id":5,"method":"Runtime.enable"}"#, 9);
        assert_eq!(wrapped.original_size as usize, wrapped.buffer.len());

        let inner = DevtoolsPayload::decode(wrapped.buffer.as_slice()).unwrap();
        assert_eq!(inner.op_id, 9);
        assert_eq!(inner.jscontext_id, "");
        assert_eq!(inner.payload, r#"{"id":5,"method":"Runtime.enable"}"#);
    }

    #[test]
    fn test_outbound_envelope_layout() {
        let codec = ProtobufCodec;
        let envelope = codec
            .wrap_payload(b"{}", 1)
            .into_envelope(1, Category::ChromeDevtools);
        let frame = codec.encode_envelope(&envelope);

        let message = DebugMessage::decode(frame.as_slice()).unwrap();
        assert_eq!(message.seq, 1);
        assert_eq!(message.category, "chromeDevtools");
        assert_eq!(message.compress_algo, COMPRESS_NONE);
        assert_eq!(message.original_size as usize, message.data.len());
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0x0a, 0xff], 8), "0aff");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "0102... (3 bytes)");
    }
}
