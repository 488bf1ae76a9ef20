//! Wire format encoding/decoding
//!
//! One message per frame. On the stream a frame is a `u32` big-endian byte
//! length followed by the frame body:
//!
//! ```text
//! [kind tag u8][id][sender][recipient][payload]
//! ```
//!
//! Name fields are `u16`-BE-length-prefixed UTF-8. The payload is the ordered
//! value map, encoded directly for `Uncompressed` messages; for `Compressed`
//! messages the encoded map is gzip-compressed and written as one
//! `u32`-BE-length-prefixed blob. The codec keeps scratch buffers across
//! calls, so each connection task owns its own `MessageCodec`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::errors::CodecError;
use crate::message::{Message, MessageKind, MessageValue};

const TAG_STR: u8 = 0x01;
const TAG_BYTES: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_BOOL: u8 = 0x05;
const TAG_MESSAGE: u8 = 0x06;

/// Number of bytes in the stream-level length prefix
pub const FRAME_HEADER_LEN: usize = 4;

// ----------------------------------------------------------------------------
// Message Codec
// ----------------------------------------------------------------------------

/// Reusable encoder/decoder for framed messages
pub struct MessageCodec {
    max_frame: usize,
    scratch: Vec<u8>,
    gzip: Vec<u8>,
}

impl MessageCodec {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            scratch: Vec::new(),
            gzip: Vec::new(),
        }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Encode `msg` as a full frame (length prefix included) into `out`
    ///
    /// `out` is cleared first; callers hand the same buffer back on every
    /// send to avoid reallocating.
    pub fn encode_frame(&mut self, msg: &Message, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.clear();
        out.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
        self.encode_message(msg, out)?;
        let body_len = out.len() - FRAME_HEADER_LEN;
        if body_len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                limit: self.max_frame,
            });
        }
        out[..FRAME_HEADER_LEN].copy_from_slice(&(body_len as u32).to_be_bytes());
        Ok(())
    }

    /// Decode one frame body (length prefix already stripped by the reader)
    pub fn decode(&mut self, body: &[u8]) -> Result<Message, CodecError> {
        if body.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                limit: self.max_frame,
            });
        }
        let mut offset = 0;
        self.decode_message(body, &mut offset)
    }

    fn encode_message(&mut self, msg: &Message, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.push(msg.kind().tag());
        write_str(out, msg.id())?;
        write_str(out, msg.sender())?;
        write_str(out, msg.recipient())?;

        match msg.kind() {
            MessageKind::Uncompressed => self.encode_values(msg, out),
            MessageKind::Compressed => {
                let mut plain = std::mem::take(&mut self.scratch);
                plain.clear();
                let encoded = self.encode_values(msg, &mut plain);
                let result = match encoded {
                    Ok(()) => self.write_compressed(&plain, out),
                    Err(e) => Err(e),
                };
                self.scratch = plain;
                result
            }
        }
    }

    fn write_compressed(&mut self, plain: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        let mut buf = std::mem::take(&mut self.gzip);
        buf.clear();
        let mut encoder = GzEncoder::new(buf, Compression::default());
        let compressed = encoder
            .write_all(plain)
            .and_then(|_| encoder.finish());
        match compressed {
            Ok(buf) => {
                out.extend_from_slice(&(buf.len() as u32).to_be_bytes());
                out.extend_from_slice(&buf);
                self.gzip = buf;
                Ok(())
            }
            Err(e) => Err(CodecError::Compression(e)),
        }
    }

    fn encode_values(&mut self, msg: &Message, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let count = msg.value_count();
        if count > u16::MAX as usize {
            return Err(CodecError::TooManyValues(count));
        }
        out.extend_from_slice(&(count as u16).to_be_bytes());
        for (key, value) in msg.values() {
            write_str(out, key)?;
            match value {
                MessageValue::Str(s) => {
                    out.push(TAG_STR);
                    write_blob(out, s.as_bytes());
                }
                MessageValue::Bytes(b) => {
                    out.push(TAG_BYTES);
                    write_blob(out, b);
                }
                MessageValue::Int(i) => {
                    out.push(TAG_INT);
                    out.extend_from_slice(&i.to_be_bytes());
                }
                MessageValue::Float(f) => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&f.to_bits().to_be_bytes());
                }
                MessageValue::Bool(b) => {
                    out.push(TAG_BOOL);
                    out.push(u8::from(*b));
                }
                MessageValue::Message(nested) => {
                    out.push(TAG_MESSAGE);
                    let len_pos = out.len();
                    out.extend_from_slice(&[0u8; 4]);
                    self.encode_message(nested, out)?;
                    let nested_len = out.len() - len_pos - 4;
                    out[len_pos..len_pos + 4]
                        .copy_from_slice(&(nested_len as u32).to_be_bytes());
                }
            }
        }
        Ok(())
    }

    fn decode_message(&mut self, data: &[u8], offset: &mut usize) -> Result<Message, CodecError> {
        let tag = read_u8(data, offset)?;
        let kind = MessageKind::from_tag(tag).ok_or(CodecError::InvalidKind(tag))?;
        let id = read_str(data, offset)?;
        let sender = read_str(data, offset)?;
        let recipient = read_str(data, offset)?;

        let mut msg = Message::new(id, kind);
        msg.set_sender(sender);
        msg.set_recipient(recipient);

        match kind {
            MessageKind::Uncompressed => self.decode_values(data, offset, &mut msg)?,
            MessageKind::Compressed => {
                let blob = read_blob(data, offset)?;
                let mut plain = std::mem::take(&mut self.scratch);
                plain.clear();
                let inflated = GzDecoder::new(blob).read_to_end(&mut plain);
                let result = match inflated {
                    Ok(_) => {
                        let mut value_offset = 0;
                        self.decode_values(&plain, &mut value_offset, &mut msg)
                    }
                    Err(e) => Err(CodecError::Compression(e)),
                };
                self.scratch = plain;
                result?;
            }
        }
        Ok(msg)
    }

    fn decode_values(
        &mut self,
        data: &[u8],
        offset: &mut usize,
        msg: &mut Message,
    ) -> Result<(), CodecError> {
        let count = read_u16(data, offset)?;
        for _ in 0..count {
            let key = read_str(data, offset)?;
            let tag = read_u8(data, offset)?;
            let value = match tag {
                TAG_STR => {
                    let blob = read_blob(data, offset)?;
                    let s = std::str::from_utf8(blob).map_err(|_| CodecError::InvalidUtf8)?;
                    MessageValue::Str(s.to_string())
                }
                TAG_BYTES => MessageValue::Bytes(read_blob(data, offset)?.to_vec()),
                TAG_INT => {
                    let raw = read_array::<8>(data, offset)?;
                    MessageValue::Int(i64::from_be_bytes(raw))
                }
                TAG_FLOAT => {
                    let raw = read_array::<8>(data, offset)?;
                    MessageValue::Float(f64::from_bits(u64::from_be_bytes(raw)))
                }
                TAG_BOOL => MessageValue::Bool(read_u8(data, offset)? != 0),
                TAG_MESSAGE => {
                    let blob = read_blob(data, offset)?;
                    let mut nested_offset = 0;
                    let nested = self.decode_message(blob, &mut nested_offset)?;
                    MessageValue::Message(Box::new(nested))
                }
                other => return Err(CodecError::InvalidValueTag(other)),
            };
            msg.push_value_unchecked(key, value);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Primitive readers/writers
// ----------------------------------------------------------------------------

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(CodecError::StringTooLong(bytes.len()));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8, CodecError> {
    let b = *data.get(*offset).ok_or(CodecError::Truncated {
        need: *offset + 1,
        have: data.len(),
    })?;
    *offset += 1;
    Ok(b)
}

fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16, CodecError> {
    let raw = read_array::<2>(data, offset)?;
    Ok(u16::from_be_bytes(raw))
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32, CodecError> {
    let raw = read_array::<4>(data, offset)?;
    Ok(u32::from_be_bytes(raw))
}

fn read_array<const N: usize>(data: &[u8], offset: &mut usize) -> Result<[u8; N], CodecError> {
    let end = *offset + N;
    if end > data.len() {
        return Err(CodecError::Truncated {
            need: end,
            have: data.len(),
        });
    }
    let mut raw = [0u8; N];
    raw.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(raw)
}

fn read_str(data: &[u8], offset: &mut usize) -> Result<String, CodecError> {
    let len = read_u16(data, offset)? as usize;
    let end = *offset + len;
    if end > data.len() {
        return Err(CodecError::Truncated {
            need: end,
            have: data.len(),
        });
    }
    let s = std::str::from_utf8(&data[*offset..end]).map_err(|_| CodecError::InvalidUtf8)?;
    *offset = end;
    Ok(s.to_string())
}

fn read_blob<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8], CodecError> {
    let len = read_u32(data, offset)? as usize;
    let end = *offset + len;
    if end > data.len() {
        return Err(CodecError::Truncated {
            need: end,
            have: data.len(),
        });
    }
    let blob = &data[*offset..end];
    *offset = end;
    Ok(blob)
}
