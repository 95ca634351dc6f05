//! Chunk framing for encrypted payloads.
//!
//! Plaintext is cut into fixed-size chunks and each chunk is sealed on its
//! own with a fresh random nonce:
//!
//! ```text
//! +----------------+-------------+---------------------------+
//! | len: u32 (BE)  | nonce (12)  | ciphertext + tag (n + 16) |
//! +----------------+-------------+---------------------------+
//! ```
//!
//! `len` counts the nonce, ciphertext and tag. The decoder is a pull-based
//! state machine over a byte buffer, so the encrypted stream can arrive in
//! fragments of any size.

use super::{CryptoError, SecretKey};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use futures::{Stream, StreamExt, stream};
use std::io;
use tokio_util::{
    codec::{Decoder, Encoder, FramedRead},
    io::StreamReader,
};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Largest plaintext chunk a decoder accepts.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const LEN_PREFIX: usize = 4;
/// Bytes a frame adds on top of its plaintext.
pub const FRAME_OVERHEAD: usize = LEN_PREFIX + NONCE_LEN + TAG_LEN;

/// Encoder/decoder for the frame format.
///
/// Encoding takes one plaintext chunk per call; chunking is the caller's
/// job (see [`encrypt_stream`]).
#[derive(Clone)]
pub struct FrameCodec {
    cipher: ChaCha20Poly1305,
}

impl FrameCodec {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    fn seal(&self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), CryptoError> {
        if chunk.len() > MAX_CHUNK_SIZE {
            return Err(CryptoError::MalformedFrame(format!(
                "chunk of {} bytes exceeds {}",
                chunk.len(),
                MAX_CHUNK_SIZE
            )));
        }
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), chunk)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        dst.reserve(LEN_PREFIX + NONCE_LEN + sealed.len());
        dst.put_u32((NONCE_LEN + sealed.len()) as u32);
        dst.put_slice(&nonce_bytes);
        dst.put_slice(&sealed);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CryptoError;

    fn encode(&mut self, chunk: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.seal(&chunk, dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = CryptoError;

    fn encode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.seal(chunk, dst)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CryptoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_len < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedFrame(format!(
                "frame length {} is shorter than nonce and tag",
                frame_len
            )));
        }
        if frame_len > NONCE_LEN + MAX_CHUNK_SIZE + TAG_LEN {
            return Err(CryptoError::MalformedFrame(format!(
                "frame length {} exceeds the maximum",
                frame_len
            )));
        }

        let needed = LEN_PREFIX + frame_len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let frame = src.split_to(frame_len);
        let (nonce, sealed) = frame.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Some(Bytes::from(plaintext)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(CryptoError::Truncated),
        }
    }
}

/// Size of the encrypted payload for `plaintext_len` bytes cut into `chunk_size` chunks.
pub fn encrypted_len(plaintext_len: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    let frames = plaintext_len.div_ceil(chunk_size);
    plaintext_len + frames * FRAME_OVERHEAD as u64
}

/// Chunk and encrypt a plaintext stream into a stream of frames.
///
/// Each yielded item is exactly one complete frame. An empty input yields
/// no frames.
pub fn encrypt_stream<S>(
    input: S,
    key: &SecretKey,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, CryptoError>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
{
    let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
    let state = Some((input, BytesMut::new(), FrameCodec::new(key)));

    stream::unfold(state, move |state| async move {
        let (mut input, mut pending, mut codec) = state?;
        loop {
            if pending.len() >= chunk_size {
                let chunk = pending.split_to(chunk_size).freeze();
                let frame = seal_frame(&mut codec, chunk);
                return Some((frame, Some((input, pending, codec))));
            }
            match input.next().await {
                Some(Ok(bytes)) => pending.extend_from_slice(&bytes),
                Some(Err(err)) => return Some((Err(CryptoError::Io(err)), None)),
                None if pending.is_empty() => return None,
                None => {
                    let chunk = pending.split().freeze();
                    return Some((seal_frame(&mut codec, chunk), None));
                }
            }
        }
    })
}

fn seal_frame(codec: &mut FrameCodec, chunk: Bytes) -> Result<Bytes, CryptoError> {
    let mut out = BytesMut::with_capacity(chunk.len() + FRAME_OVERHEAD);
    codec.encode(chunk, &mut out)?;
    Ok(out.freeze())
}

/// Reassemble and decrypt an encrypted byte stream fragmented arbitrarily.
///
/// Yields one plaintext chunk per frame. A stream that stops inside a frame
/// ends with [`CryptoError::Truncated`].
pub fn decrypt_stream<S>(
    input: S,
    key: &SecretKey,
) -> impl Stream<Item = Result<Bytes, CryptoError>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
{
    FramedRead::new(StreamReader::new(input), FrameCodec::new(key))
}
