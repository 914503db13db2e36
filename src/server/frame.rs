use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::core::error::{Error, ErrorKind, Result};

/// Largest single reservation made while waiting for a frame body
const RESERVE_STEP: usize = 64 * 1024;

/// Length-prefixed framing: an unsigned LEB128 varint length (at most 32
/// bits, so at most 5 bytes) followed by exactly that many payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    pub max_frame_len: usize,
}

impl FrameCodec {
    pub const MAX_PREFIX_LEN: usize = 5;

    pub fn new(max_frame_len: usize) -> Self {
        FrameCodec { max_frame_len }
    }

    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_frame_len || payload.len() > u32::MAX as usize {
            return Err(Error::new(ErrorKind::TooLarge, format!(
                "frame of {} bytes exceeds limit {}", payload.len(), self.max_frame_len
            )));
        }
        dst.reserve(Self::MAX_PREFIX_LEN + payload.len());
        put_varint32(dst, payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }

    /// Next complete frame, or `None` until enough bytes have been buffered.
    /// Consumed bytes are removed from `src`.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some((len, prefix)) = read_varint32(src)? else {
            return Ok(None);
        };
        let len = len as usize;
        if len > self.max_frame_len {
            return Err(Error::decode(format!(
                "incoming frame of {} bytes exceeds limit {}", len, self.max_frame_len
            )));
        }

        let total = prefix + len;
        if src.len() < total {
            src.reserve((total - src.len()).min(RESERVE_STEP));
            return Ok(None);
        }

        src.advance(prefix);
        Ok(Some(src.split_to(len).freeze()))
    }
}

fn put_varint32(dst: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// `(value, prefix_len)`, or `None` if the prefix is still incomplete
fn read_varint32(src: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value: u32 = 0;
    for (i, byte) in src.iter().take(FrameCodec::MAX_PREFIX_LEN).enumerate() {
        if i == FrameCodec::MAX_PREFIX_LEN - 1 && *byte > 0x0f {
            return Err(Error::decode("frame length prefix exceeds 32 bits"));
        }
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}
