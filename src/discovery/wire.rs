//! Wire codec for the discovery pipe.
//!
//! Every frame is a fixed header followed by `payload_size` bytes:
//!
//! ```text
//! [u32 payload_size][u32 routing_id][u32 message_type][u32 flags][u32 attachment_count]
//! [payload: payload_size bytes]
//! ```
//!
//! All header fields are little-endian. Two message types occur:
//! - `0xFFFF` hello: payload is a run of `u32` words, echoed back as the ack
//! - `0`      string: 4-byte prefix, then JSON text padded with trailing bytes

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{
    PIPE_HEADER_SIZE, PIPE_MAX_PAYLOAD, PIPE_MSG_HELLO, PIPE_MSG_STRING, PIPE_STRING_PREFIX,
};

/// Fixed discovery frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of payload bytes following the header.
    pub payload_size: u32,
    /// Sender routing id (our PID on the ack).
    pub routing_id: u32,
    /// `0xFFFF` for hello, `0` for string.
    pub message_type: u32,
    /// Opaque flags, echoed unchanged.
    pub flags: u32,
    /// Opaque attachment count, echoed unchanged.
    pub attachment_count: u32,
}

impl FrameHeader {
    /// Decode a header from its 20 wire bytes.
    pub fn decode(bytes: &[u8; PIPE_HEADER_SIZE]) -> Self {
        let field = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Self {
            payload_size: field(0),
            routing_id: field(4),
            message_type: field(8),
            flags: field(12),
            attachment_count: field(16),
        }
    }

    /// Encode the header into its 20 wire bytes.
    pub fn encode(&self) -> [u8; PIPE_HEADER_SIZE] {
        let mut buf = [0u8; PIPE_HEADER_SIZE];
        let fields = [
            self.payload_size,
            self.routing_id,
            self.message_type,
            self.flags,
            self.attachment_count,
        ];
        for (chunk, value) in buf.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        buf
    }
}

/// A decoded discovery frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeFrame {
    /// Launcher hello; its words are echoed back in the ack.
    Hello {
        /// Header as received.
        header: FrameHeader,
        /// Payload as `u32` words (trailing partial word ignored).
        words: Vec<u32>,
    },

    /// JSON document (runtime information).
    String(Value),
}

impl PipeFrame {
    fn decode(header: FrameHeader, payload: &[u8]) -> Result<Self> {
        match header.message_type {
            PIPE_MSG_HELLO => {
                let words = payload
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect();
                Ok(Self::Hello { header, words })
            }
            PIPE_MSG_STRING => Ok(Self::String(parse_string_payload(payload)?)),
            other => bail!("Unknown discovery message type: 0x{other:04x}"),
        }
    }
}

/// Parse a string frame payload: skip the prefix and cut after the last `}`.
pub fn parse_string_payload(payload: &[u8]) -> Result<Value> {
    if payload.len() < PIPE_STRING_PREFIX {
        bail!("String frame too short: {} bytes", payload.len());
    }
    let text = &payload[PIPE_STRING_PREFIX..];
    let end = text
        .iter()
        .rposition(|&b| b == b'}')
        .context("String frame carries no JSON object")?;
    serde_json::from_slice(&text[..=end]).context("Invalid JSON in string frame")
}

/// Build the ack for a hello: same header and words, routed from `pid`.
pub fn hello_ack(header: &FrameHeader, words: &[u32], pid: u32) -> Vec<u8> {
    let reply = FrameHeader {
        payload_size: (words.len() * 4) as u32,
        routing_id: pid,
        ..*header
    };
    let mut buf = Vec::with_capacity(PIPE_HEADER_SIZE + words.len() * 4);
    buf.extend_from_slice(&reply.encode());
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}

/// Read one complete frame.
///
/// # Errors
///
/// I/O failures, oversized payloads, unknown message types and undecodable
/// string payloads.
pub async fn read_frame<R>(reader: &mut R) -> Result<PipeFrame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; PIPE_HEADER_SIZE];
    reader
        .read_exact(&mut head)
        .await
        .context("Failed to read discovery frame header")?;
    let header = FrameHeader::decode(&head);

    if header.payload_size > PIPE_MAX_PAYLOAD {
        bail!(
            "Discovery frame too large: {} bytes (max {PIPE_MAX_PAYLOAD})",
            header.payload_size
        );
    }

    let mut payload = vec![0u8; header.payload_size as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("Failed to read discovery frame payload")?;

    PipeFrame::decode(header, &payload)
}

/// Extract `payload.port` from the runtime information document.
pub fn port_from_info(info: &Value) -> Result<u16> {
    let port = info
        .get("payload")
        .and_then(|p| p.get("port"))
        .context("Runtime information carries no payload.port")?;
    let port = match port {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .with_context(|| format!("Invalid port in runtime information: {port}"))?;
    u16::try_from(port).with_context(|| format!("Port out of range: {port}"))
}

/// Run the discovery exchange on a connected stream and return the port.
///
/// Expects a hello, answers it with [`hello_ack`], then expects the string
/// frame carrying the port.
pub async fn exchange<S>(stream: &mut S, pid: u32) -> Result<u16>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (header, words) = match read_frame(stream).await? {
        PipeFrame::Hello { header, words } => (header, words),
        PipeFrame::String(_) => bail!("Expected hello frame, got string frame"),
    };
    log::debug!("[Discovery] Hello from launcher ({} word(s))", words.len());

    stream
        .write_all(&hello_ack(&header, &words, pid))
        .await
        .context("Failed to write hello ack")?;
    stream.flush().await.context("Failed to flush hello ack")?;

    match read_frame(stream).await? {
        PipeFrame::String(info) => {
            let port = port_from_info(&info)?;
            log::info!("[Discovery] Runtime bus port is {}", port);
            Ok(port)
        }
        PipeFrame::Hello { .. } => bail!("Expected string frame, got a second hello"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_frame(header: FrameHeader, payload: &[u8]) -> Vec<u8> {
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = FrameHeader {
            payload_size: 8,
            routing_id: 0,
            message_type: PIPE_MSG_HELLO,
            flags: 0,
            attachment_count: 0,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[..4], &[8, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0xFF, 0xFF, 0, 0]);
        assert_eq!(FrameHeader::decode(&bytes), header);
    }

    #[tokio::test]
    async fn test_hello_frame_decodes_words() {
        let header = FrameHeader {
            payload_size: 8,
            routing_id: 0,
            message_type: PIPE_MSG_HELLO,
            flags: 0,
            attachment_count: 0,
        };
        let bytes = raw_frame(header, &[1, 0, 0, 0, 2, 0, 0, 0]);

        let frame = read_frame(&mut bytes.as_slice()).await.unwrap();
        assert_eq!(
            frame,
            PipeFrame::Hello {
                header,
                words: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_hello_ack_replaces_routing_id() {
        let header = FrameHeader {
            payload_size: 8,
            routing_id: 0,
            message_type: PIPE_MSG_HELLO,
            flags: 0,
            attachment_count: 0,
        };
        let ack = hello_ack(&header, &[1, 2], 4242);

        let mut expected = FrameHeader {
            routing_id: 4242,
            ..header
        }
        .encode()
        .to_vec();
        expected.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(ack, expected);
    }

    #[test]
    fn test_single_word_hello_ack_is_24_bytes() {
        let header = FrameHeader {
            payload_size: 4,
            routing_id: 7,
            message_type: PIPE_MSG_HELLO,
            flags: 1,
            attachment_count: 0,
        };
        let ack = hello_ack(&header, &[9], 1);
        assert_eq!(ack.len(), 24);
        assert_eq!(&ack[12..16], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_string_payload_trailing_bytes_discarded() {
        let mut payload = vec![0xAA, 0xBB, 0xCC, 0xDD];
        payload.extend_from_slice(br#"{"payload":{"port":9697}}"#);
        payload.extend_from_slice(&[0, 0, b'x']);

        let info = parse_string_payload(&payload).unwrap();
        assert_eq!(info, json!({"payload": {"port": 9697}}));
        assert_eq!(port_from_info(&info).unwrap(), 9697);
    }

    #[test]
    fn test_string_payload_without_brace_fails() {
        assert!(parse_string_payload(b"\0\0\0\0no json here").is_err());
        assert!(parse_string_payload(b"{}").is_err());
    }

    #[test]
    fn test_port_may_be_string() {
        assert_eq!(port_from_info(&json!({"payload": {"port": "9700"}})).unwrap(), 9700);
        assert!(port_from_info(&json!({"payload": {}})).is_err());
        assert!(port_from_info(&json!({"payload": {"port": 70000}})).is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = FrameHeader {
            payload_size: PIPE_MAX_PAYLOAD + 1,
            routing_id: 0,
            message_type: PIPE_MSG_STRING,
            flags: 0,
            attachment_count: 0,
        };
        let bytes = header.encode();
        let err = read_frame(&mut bytes.as_slice()).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_unknown_message_type_rejected() {
        let header = FrameHeader {
            payload_size: 0,
            routing_id: 0,
            message_type: 3,
            flags: 0,
            attachment_count: 0,
        };
        let bytes = header.encode();
        assert!(read_frame(&mut bytes.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_payload_fails() {
        let header = FrameHeader {
            payload_size: 8,
            routing_id: 0,
            message_type: PIPE_MSG_HELLO,
            flags: 0,
            attachment_count: 0,
        };
        let bytes = raw_frame(header, &[1, 0, 0]);
        assert!(read_frame(&mut bytes.as_slice()).await.is_err());
    }
}
