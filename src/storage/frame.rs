use crate::error::SyndicError;
use crc32c::crc32c;
use std::io::Read;
use thiserror::Error;

pub const FRAME_MAGIC: &[u8; 8] = b"SYNCOL01";
pub const MAX_FRAME_BODY_BYTES: usize = 256 * 1024 * 1024;

// key_len(2) + write_seq(8) + timestamp(8) + encoding(1) + crc(4)
const FIXED_BODY_BYTES: usize = 2 + 8 + 8 + 1 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    Json,
    JsonZstd,
}

impl PayloadEncoding {
    pub fn as_u8(self) -> u8 {
        match self {
            PayloadEncoding::Json => 0x01,
            PayloadEncoding::JsonZstd => 0x02,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PayloadEncoding::Json),
            0x02 => Some(PayloadEncoding::JsonZstd),
            _ => None,
        }
    }
}

/// One stored collection as laid out in its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFrame {
    pub key: String,
    pub write_seq: u64,
    pub timestamp_micros: u64,
    pub encoding: PayloadEncoding,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame")]
    Truncation,
    #[error("corrupt frame")]
    Corruption,
    #[error("bad frame magic")]
    BadMagic,
    #[error("unknown payload encoding {0:#04x}")]
    UnknownEncoding(u8),
    #[error("frame body of {0} bytes exceeds limit")]
    Oversized(usize),
    #[error("payload expands beyond {0} bytes")]
    PayloadTooLarge(usize),
    #[error("payload codec error: {0}")]
    Codec(String),
}

impl From<FrameError> for SyndicError {
    fn from(value: FrameError) -> Self {
        SyndicError::IntegrityError {
            message: value.to_string(),
        }
    }
}

pub fn encode_frame(frame: &CollectionFrame) -> Result<Vec<u8>, FrameError> {
    let key_len = u16::try_from(frame.key.len()).map_err(|_| FrameError::Corruption)?;
    let body_len = FIXED_BODY_BYTES + frame.key.len() + frame.payload.len();
    if body_len > MAX_FRAME_BODY_BYTES {
        return Err(FrameError::Oversized(body_len));
    }
    let frame_length = u32::try_from(body_len).map_err(|_| FrameError::Oversized(body_len))?;

    let mut out = Vec::with_capacity(FRAME_MAGIC.len() + 4 + body_len);
    out.extend_from_slice(FRAME_MAGIC);
    out.extend_from_slice(&frame_length.to_be_bytes());
    out.extend_from_slice(&key_len.to_be_bytes());
    out.extend_from_slice(frame.key.as_bytes());
    out.extend_from_slice(&frame.write_seq.to_be_bytes());
    out.extend_from_slice(&frame.timestamp_micros.to_be_bytes());
    out.push(frame.encoding.as_u8());
    out.extend_from_slice(&frame.payload);
    // crc covers the length prefix and the body, not the magic
    let crc = crc32c(&out[FRAME_MAGIC.len()..]);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

pub fn decode_frame(bytes: &[u8]) -> Result<CollectionFrame, FrameError> {
    let header_len = FRAME_MAGIC.len() + 4;
    if bytes.len() < FRAME_MAGIC.len() {
        return Err(FrameError::Truncation);
    }
    if &bytes[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Err(FrameError::BadMagic);
    }
    if bytes.len() < header_len {
        return Err(FrameError::Truncation);
    }
    let frame_length = u32::from_be_bytes(
        bytes[FRAME_MAGIC.len()..header_len]
            .try_into()
            .map_err(|_| FrameError::Corruption)?,
    ) as usize;
    if frame_length < FIXED_BODY_BYTES {
        return Err(FrameError::Corruption);
    }
    if frame_length > MAX_FRAME_BODY_BYTES {
        return Err(FrameError::Oversized(frame_length));
    }
    let end = header_len + frame_length;
    if bytes.len() < end {
        return Err(FrameError::Truncation);
    }
    if bytes.len() > end {
        return Err(FrameError::Corruption);
    }

    let crc_offset = end - 4;
    let stored_crc = u32::from_be_bytes(
        bytes[crc_offset..end]
            .try_into()
            .map_err(|_| FrameError::Corruption)?,
    );
    if crc32c(&bytes[FRAME_MAGIC.len()..crc_offset]) != stored_crc {
        return Err(FrameError::Corruption);
    }

    let body = &bytes[header_len..crc_offset];
    let key_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if 2 + key_len + 17 > body.len() {
        return Err(FrameError::Corruption);
    }
    let key = std::str::from_utf8(&body[2..2 + key_len])
        .map_err(|_| FrameError::Corruption)?
        .to_string();
    let mut cursor = 2 + key_len;
    let write_seq = u64::from_be_bytes(
        body[cursor..cursor + 8]
            .try_into()
            .map_err(|_| FrameError::Corruption)?,
    );
    cursor += 8;
    let timestamp_micros = u64::from_be_bytes(
        body[cursor..cursor + 8]
            .try_into()
            .map_err(|_| FrameError::Corruption)?,
    );
    cursor += 8;
    let encoding =
        PayloadEncoding::from_u8(body[cursor]).ok_or(FrameError::UnknownEncoding(body[cursor]))?;
    cursor += 1;

    Ok(CollectionFrame {
        key,
        write_seq,
        timestamp_micros,
        encoding,
        payload: body[cursor..].to_vec(),
    })
}

/// Compresses `json` when it is at least `threshold` bytes long.
pub fn pack_payload(
    json: Vec<u8>,
    threshold: usize,
    level: i32,
) -> Result<(PayloadEncoding, Vec<u8>), FrameError> {
    if json.len() < threshold {
        return Ok((PayloadEncoding::Json, json));
    }
    let compressed = zstd::stream::encode_all(json.as_slice(), level)
        .map_err(|e| FrameError::Codec(e.to_string()))?;
    Ok((PayloadEncoding::JsonZstd, compressed))
}

/// Restores the JSON bytes of a payload, refusing anything over `max_bytes`.
///
/// Decompression reads at most one byte past the limit.
pub fn unpack_payload(
    encoding: PayloadEncoding,
    payload: Vec<u8>,
    max_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let json = match encoding {
        PayloadEncoding::Json => payload,
        PayloadEncoding::JsonZstd => {
            let decoder = zstd::stream::read::Decoder::new(payload.as_slice())
                .map_err(|e| FrameError::Codec(e.to_string()))?;
            let mut json = Vec::new();
            decoder
                .take(max_bytes as u64 + 1)
                .read_to_end(&mut json)
                .map_err(|e| FrameError::Codec(e.to_string()))?;
            json
        }
    };
    if json.len() > max_bytes {
        return Err(FrameError::PayloadTooLarge(max_bytes));
    }
    Ok(json)
}
