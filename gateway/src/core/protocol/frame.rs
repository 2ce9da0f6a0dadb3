use bytes::{BufMut, Bytes, BytesMut};

use super::{ProtocolError, ProtocolResult};

/// Type tag stored in byte 0 of every binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    Audio = 0x01,
    TurnComplete = 0x02,
    Interruption = 0x03,
}

impl TryFrom<u8> for FrameTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameTag::Audio),
            0x02 => Ok(FrameTag::TurnComplete),
            0x03 => Ok(FrameTag::Interruption),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PCM16 LE mono samples. May be empty; receivers decide what an empty
    /// chunk means.
    Audio(Bytes),
    TurnComplete,
    Interruption,
}

impl Frame {
    pub fn tag(&self) -> FrameTag {
        match self {
            Frame::Audio(_) => FrameTag::Audio,
            Frame::TurnComplete => FrameTag::TurnComplete,
            Frame::Interruption => FrameTag::Interruption,
        }
    }

    /// Serialize to `tag || payload`.
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Audio(pcm) => {
                let mut buf = BytesMut::with_capacity(1 + pcm.len());
                buf.put_u8(FrameTag::Audio as u8);
                buf.extend_from_slice(pcm);
                buf.freeze()
            }
            Frame::TurnComplete | Frame::Interruption => {
                Bytes::copy_from_slice(&[self.tag() as u8])
            }
        }
    }

    /// Parse a binary WebSocket message. The audio payload is a zero-copy
    /// slice of `data`.
    pub fn decode(data: Bytes) -> ProtocolResult<Frame> {
        let Some(&first) = data.first() else {
            return Err(ProtocolError::EmptyFrame);
        };

        let tag = FrameTag::try_from(first)?;
        let payload_len = data.len() - 1;
        match tag {
            FrameTag::Audio => Ok(Frame::Audio(data.slice(1..))),
            FrameTag::TurnComplete if payload_len == 0 => Ok(Frame::TurnComplete),
            FrameTag::Interruption if payload_len == 0 => Ok(Frame::Interruption),
            tag => Err(ProtocolError::UnexpectedPayload {
                tag,
                len: payload_len,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_audio_prefixes_tag() {
        let frame = Frame::Audio(Bytes::from_static(&[0x10, 0x20, 0x30, 0x40]));
        assert_eq!(frame.encode().as_ref(), &[0x01, 0x10, 0x20, 0x30, 0x40]);
    }

    #[test]
    fn test_encode_bare_tags() {
        assert_eq!(Frame::TurnComplete.encode().as_ref(), &[0x02]);
        assert_eq!(Frame::Interruption.encode().as_ref(), &[0x03]);
    }

    #[test]
    fn test_decode_audio_payload() {
        let frame = Frame::decode(Bytes::from_static(&[0x01, 0xAA, 0xBB])).unwrap();
        assert_eq!(frame, Frame::Audio(Bytes::from_static(&[0xAA, 0xBB])));
    }

    #[test]
    fn test_decode_audio_without_payload() {
        let frame = Frame::decode(Bytes::from_static(&[0x01])).unwrap();
        assert_eq!(frame, Frame::Audio(Bytes::new()));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(
            Frame::decode(Bytes::new()),
            Err(ProtocolError::EmptyFrame)
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        assert_eq!(
            Frame::decode(Bytes::from_static(&[0x7F, 0x00])),
            Err(ProtocolError::UnknownTag(0x7F))
        );
    }

    #[test]
    fn test_decode_bare_tag_with_payload_is_rejected() {
        let err = Frame::decode(Bytes::from_static(&[0x03, 0x00])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedPayload {
                tag: FrameTag::Interruption,
                len: 1
            }
        );
    }

    #[test]
    fn test_unknown_tag_display() {
        assert_eq!(
            ProtocolError::UnknownTag(0x0A).to_string(),
            "Unknown frame tag: 0x0a"
        );
    }
}
