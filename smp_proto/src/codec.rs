//! Wire codec (spec.md §4.1, C2): fixed tags, explicit integer widths,
//! length-prefixed byte strings, and transmission batching.
//!
//! Every wire value is a fixed tag followed by a length-prefixed body where
//! appropriate. Integers are explicit-width, big-endian. Byte strings carry
//! a one-byte length for small values (`< 256` bytes) or a two-byte "Large"
//! form otherwise; a field that consumes the rest of the buffer (the last
//! field of a [`Transmission`]) uses an explicit "Tail" marker instead of a
//! length prefix.
//!
//! Transmissions may be batched into one fixed-size block: a one-byte count
//! followed by that many length-prefixed transmissions, packed back to back
//! and zero-padded out to the handle's block size. Max batch count is 255;
//! max batch bytes is `block_size − 3` (1 count byte + 2-byte running length
//! check margin).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of buffer while decoding {0}")]
    Truncated(&'static str),
    #[error("length prefix form byte {0:#x} is not Small (0x00) or Large (0x01)")]
    BadLengthForm(u8),
    #[error("transmission of {0} bytes exceeds the maximum single-message size")]
    LargeMsg(usize),
    #[error("batch of {0} transmissions exceeds the 255 maximum")]
    BatchTooLarge(usize),
    #[error("batch contents ({0} bytes) exceed block_size - 3 ({1} bytes)")]
    BatchOverflow(usize, usize),
    #[error("block size must be larger than the 3-byte batch overhead")]
    BlockTooSmall,
    #[error("trailing garbage after decoding {0}")]
    TrailingBytes(&'static str),
}

const SMALL_FORM: u8 = 0x00;
const LARGE_FORM: u8 = 0x01;
const LARGE_THRESHOLD: usize = 256;

/// A cursor over an immutable byte slice, used by all `decode_*` helpers.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8, "u64")?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Read a fixed 32-byte array (hashes, public keys) with no length prefix.
    pub fn array32(&mut self) -> Result<[u8; 32], CodecError> {
        let b = self.take(32, "32-byte array")?;
        Ok(b.try_into().unwrap())
    }

    /// Decode a length-prefixed byte string (Small/Large form).
    pub fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let form = self.u8()?;
        let len = match form {
            SMALL_FORM => self.u8()? as usize,
            LARGE_FORM => self.u16()? as usize,
            other => return Err(CodecError::BadLengthForm(other)),
        };
        self.take(len, "length-prefixed bytes")
    }

    /// Consume the remainder of the buffer as a "Tail" field.
    pub fn tail(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

/// Append `data` as a Small/Large length-prefixed field.
pub fn put_bytes(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() < LARGE_THRESHOLD {
        out.push(SMALL_FORM);
        out.push(data.len() as u8);
    } else {
        out.push(LARGE_FORM);
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(data);
}

pub fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// An authorized unit on the wire (spec.md §3): `(authenticator, session_id,
/// corr_id, entity_id, command_bytes)`. `authenticator` empty means
/// unauthenticated; `command_bytes` is a Tail field (must be encoded last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub authenticator: Vec<u8>,
    pub session_id: Vec<u8>,
    pub corr_id: Vec<u8>,
    pub entity_id: Vec<u8>,
    pub command_bytes: Vec<u8>,
}

impl Transmission {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes(&mut out, &self.authenticator);
        put_bytes(&mut out, &self.session_id);
        put_bytes(&mut out, &self.corr_id);
        put_bytes(&mut out, &self.entity_id);
        out.extend_from_slice(&self.command_bytes); // Tail
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let authenticator = r.bytes()?.to_vec();
        let session_id = r.bytes()?.to_vec();
        let corr_id = r.bytes()?.to_vec();
        let entity_id = r.bytes()?.to_vec();
        let command_bytes = r.tail().to_vec();
        Ok(Self { authenticator, session_id, corr_id, entity_id, command_bytes })
    }
}

/// Pack transmissions into fixed-size blocks ready for the transport (C4).
/// Each block: `[count: u8][len-prefixed transmission]* [zero padding]`.
pub fn encode_batch(transmissions: &[Transmission], block_size: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    if block_size <= 3 {
        return Err(CodecError::BlockTooSmall);
    }
    let max_batch_bytes = block_size - 3;
    let mut blocks = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut current_len = 1usize; // count byte

    for t in transmissions {
        let encoded = t.encode();
        let framed_len = length_prefix_size(encoded.len()) + encoded.len();
        if framed_len > max_batch_bytes {
            return Err(CodecError::LargeMsg(encoded.len()));
        }
        if current.len() == 255 || current_len + framed_len > max_batch_bytes {
            blocks.push(finish_block(&current, block_size)?);
            current.clear();
            current_len = 1;
        }
        current_len += framed_len;
        current.push(encoded);
    }
    if !current.is_empty() {
        blocks.push(finish_block(&current, block_size)?);
    }
    Ok(blocks)
}

fn length_prefix_size(len: usize) -> usize {
    if len < LARGE_THRESHOLD {
        3 // form + 1-byte len
    } else {
        3 // form + 2-byte len
    }
}

fn finish_block(encoded: &[Vec<u8>], block_size: usize) -> Result<Vec<u8>, CodecError> {
    if encoded.len() > 255 {
        return Err(CodecError::BatchTooLarge(encoded.len()));
    }
    let mut block = Vec::with_capacity(block_size);
    block.push(encoded.len() as u8);
    for e in encoded {
        put_bytes(&mut block, e);
    }
    if block.len() > block_size {
        return Err(CodecError::BatchOverflow(block.len(), block_size));
    }
    block.resize(block_size, 0);
    Ok(block)
}

/// Decode a fixed-size block back into its batched transmissions.
pub fn decode_batch(block: &[u8]) -> Result<Vec<Transmission>, CodecError> {
    let mut r = Reader::new(block);
    let count = r.u8()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = r.bytes()?;
        out.push(Transmission::decode(raw)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: u8) -> Transmission {
        Transmission {
            authenticator: vec![i; 4],
            session_id: vec![0xAB; 16],
            corr_id: format!("corr-{i}").into_bytes(),
            entity_id: format!("queue-{i}").into_bytes(),
            command_bytes: vec![i; 32],
        }
    }

    #[test]
    fn transmission_roundtrip() {
        let t = sample(7);
        let encoded = t.encode();
        let decoded = Transmission::decode(&encoded).unwrap();
        assert_eq!(t, decoded);
    }

    #[test]
    fn batch_roundtrip() {
        let txs: Vec<_> = (0..5).map(sample).collect();
        let blocks = encode_batch(&txs, 4096).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 4096);
        let decoded = decode_batch(&blocks[0]).unwrap();
        assert_eq!(decoded, txs);
    }

    #[test]
    fn batch_splits_across_blocks_when_oversize() {
        let txs: Vec<_> = (0..40).map(sample).collect();
        let blocks = encode_batch(&txs, 512).unwrap();
        assert!(blocks.len() > 1);
        let mut all = Vec::new();
        for b in &blocks {
            all.extend(decode_batch(b).unwrap());
        }
        assert_eq!(all, txs);
    }

    #[test]
    fn oversize_transmission_is_large_msg() {
        let mut t = sample(1);
        t.command_bytes = vec![0u8; 5000];
        let err = encode_batch(&[t], 512).unwrap_err();
        assert!(matches!(err, CodecError::LargeMsg(_)));
    }

    #[test]
    fn batch_count_never_exceeds_255() {
        let txs: Vec<_> = (0..300).map(|i| sample((i % 255) as u8)).collect();
        let blocks = encode_batch(&txs, 16384).unwrap();
        for b in &blocks {
            let decoded = decode_batch(b).unwrap();
            assert!(decoded.len() <= 255);
        }
    }
}
