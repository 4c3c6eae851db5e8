//! # Audio Frames
//!
//! Inbound clients send PCM16 little-endian mono either as binary messages or as
//! base64 text (the protocol existing telephony clients speak). Outbound audio is encoded
//! the same way, per `bridge.outbound_encoding`.

use crate::config::OutboundEncoding;
use crate::error::FrameDecodeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// One message as received from the inbound connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Binary(Vec<u8>),
    Text(String),
}

/// A validated PCM16 frame (even, non-zero length).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame(Vec<u8>);

impl AudioFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }
}

pub fn decode_inbound(
    message: InboundMessage,
    max_bytes: usize,
) -> Result<AudioFrame, FrameDecodeError> {
    let bytes = match message {
        InboundMessage::Binary(bytes) => bytes,
        InboundMessage::Text(text) => BASE64
            .decode(text.trim().as_bytes())
            .map_err(|e| FrameDecodeError::InvalidBase64(e.to_string()))?,
    };

    if bytes.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(FrameDecodeError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    if bytes.len() % 2 != 0 {
        return Err(FrameDecodeError::OddLength(bytes.len()));
    }
    Ok(AudioFrame(bytes))
}

/// Audio on its way back to the inbound client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundFrame {
    pub fn encode(pcm16: Vec<u8>, encoding: OutboundEncoding) -> Self {
        match encoding {
            OutboundEncoding::Base64 => OutboundFrame::Text(BASE64.encode(pcm16)),
            OutboundEncoding::Binary => OutboundFrame::Binary(pcm16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_frame() {
        let frame = decode_inbound(InboundMessage::Binary(vec![1, 0, 2, 0]), 1024).unwrap();
        assert_eq!(frame.as_bytes(), &[1, 0, 2, 0]);
        assert_eq!(frame.sample_count(), 2);
    }

    #[test]
    fn test_base64_text_frame() {
        let frame = decode_inbound(InboundMessage::Text(" AQACAA==\n".to_string()), 1024).unwrap();
        assert_eq!(frame.as_bytes(), &[1, 0, 2, 0]);
    }

    #[test]
    fn test_rejected_frames() {
        assert_eq!(
            decode_inbound(InboundMessage::Binary(vec![]), 1024),
            Err(FrameDecodeError::Empty)
        );
        assert_eq!(
            decode_inbound(InboundMessage::Binary(vec![1, 2, 3]), 1024),
            Err(FrameDecodeError::OddLength(3))
        );
        assert_eq!(
            decode_inbound(InboundMessage::Binary(vec![0; 8]), 4),
            Err(FrameDecodeError::TooLarge { size: 8, max: 4 })
        );
        assert!(matches!(
            decode_inbound(InboundMessage::Text("not base64!".to_string()), 1024),
            Err(FrameDecodeError::InvalidBase64(_))
        ));
        assert_eq!(
            decode_inbound(InboundMessage::Text(String::new()), 1024),
            Err(FrameDecodeError::Empty)
        );
    }

    #[test]
    fn test_outbound_encoding() {
        assert_eq!(
            OutboundFrame::encode(vec![1, 0], OutboundEncoding::Base64),
            OutboundFrame::Text("AQA=".to_string())
        );
        assert_eq!(
            OutboundFrame::encode(vec![1, 0], OutboundEncoding::Binary),
            OutboundFrame::Binary(vec![1, 0])
        );
    }
}
