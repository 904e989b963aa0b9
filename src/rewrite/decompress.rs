//! Gzip request body decoding.
//!
//! Decodes a fully buffered gzip body (RFC 1952, one or more members) into a
//! pooled buffer using pooled inflate state and a pooled copy chunk.

use axum::http::header::CONTENT_ENCODING;
use axum::http::HeaderMap;
use flate2::{Crc, Decompress, DecompressError, FlushDecompress, Status};
use thiserror::Error;

use crate::pool::{PooledBuf, Pools};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xe0;

/// Errors from decoding a gzip body.
#[derive(Debug, Error)]
pub enum GzipError {
    #[error("invalid gzip header: {0}")]
    Header(&'static str),

    #[error("inflate failed: {0}")]
    Inflate(#[from] DecompressError),

    #[error("gzip stream is truncated")]
    Truncated,

    #[error("gzip trailer mismatch: {0}")]
    Trailer(&'static str),

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// True when the `Content-Encoding` header names gzip.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip")
        })
        .unwrap_or(false)
}

/// Reusable raw-inflate state plus the running checksum.
#[derive(Debug)]
pub struct GzipDecoder {
    inflate: Decompress,
    crc: Crc,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            inflate: Decompress::new(false),
            crc: Crc::new(),
        }
    }

    /// Prepare for a new member.
    pub fn reset(&mut self) {
        self.inflate.reset(false);
        self.crc.reset();
    }

    /// Decode every member of `input`, appending plaintext to `out`.
    ///
    /// `chunk` is scratch space for inflate output; `limit` caps `out.len()`.
    pub fn decode(
        &mut self,
        input: &[u8],
        chunk: &mut [u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), GzipError> {
        let mut pos = 0;
        loop {
            pos += self.decode_member(&input[pos..], chunk, out, limit)?;
            if pos == input.len() {
                return Ok(());
            }
        }
    }

    /// Decode one member, returning the number of input bytes it spanned.
    fn decode_member(
        &mut self,
        input: &[u8],
        chunk: &mut [u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<usize, GzipError> {
        self.reset();
        let mut pos = header_len(input)?;

        loop {
            let in_before = self.inflate.total_in();
            let out_before = self.inflate.total_out();
            let status = self
                .inflate
                .decompress(&input[pos..], chunk, FlushDecompress::None)?;
            let consumed = (self.inflate.total_in() - in_before) as usize;
            let produced = (self.inflate.total_out() - out_before) as usize;
            pos += consumed;

            if out.len() + produced > limit {
                return Err(GzipError::TooLarge { limit });
            }
            let data = &chunk[..produced];
            self.crc.update(data);
            out.extend_from_slice(data);

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(GzipError::Truncated);
                }
                Status::Ok | Status::BufError => {}
            }
        }

        let trailer = input.get(pos..pos + 8).ok_or(GzipError::Truncated)?;
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if crc != self.crc.sum() {
            return Err(GzipError::Trailer("crc32"));
        }
        if size != self.crc.amount() {
            return Err(GzipError::Trailer("isize"));
        }
        Ok(pos + 8)
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the member header at the start of `input`.
fn header_len(input: &[u8]) -> Result<usize, GzipError> {
    if input.len() < 10 {
        return Err(GzipError::Header("too short"));
    }
    if input[..2] != GZIP_MAGIC {
        return Err(GzipError::Header("bad magic"));
    }
    if input[2] != CM_DEFLATE {
        return Err(GzipError::Header("unsupported compression method"));
    }
    let flags = input[3];
    if flags & FRESERVED != 0 {
        return Err(GzipError::Header("reserved flags set"));
    }

    let mut pos = 10;
    if flags & FEXTRA != 0 {
        let len = input.get(pos..pos + 2).ok_or(GzipError::Truncated)?;
        pos += 2 + u16::from_le_bytes([len[0], len[1]]) as usize;
    }
    if flags & FNAME != 0 {
        pos = skip_zero_terminated(input, pos)?;
    }
    if flags & FCOMMENT != 0 {
        pos = skip_zero_terminated(input, pos)?;
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    if pos > input.len() {
        return Err(GzipError::Truncated);
    }
    Ok(pos)
}

fn skip_zero_terminated(input: &[u8], from: usize) -> Result<usize, GzipError> {
    let rest = input.get(from..).ok_or(GzipError::Truncated)?;
    memchr::memchr(0, rest)
        .map(|nul| from + nul + 1)
        .ok_or(GzipError::Truncated)
}

/// Decode a gzip body into a fresh pooled buffer.
///
/// The decoder and chunk go back to their pools before this returns; the
/// output buffer is released by its caller.
pub fn gunzip(pools: &Pools, input: &[u8], limit: usize) -> Result<PooledBuf, GzipError> {
    let mut decoder = pools.decoders.acquire();
    let mut chunk = pools.chunks.acquire();
    let mut out = pools.buffers.acquire();
    out.reserve(input.len().saturating_mul(4).min(limit));
    decoder.decode(input, &mut chunk, &mut out, limit)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use axum::http::HeaderValue;
    use flate2::write::GzEncoder;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn pools() -> Pools {
        Pools::new(&PoolConfig {
            chunk_size: 64,
            ..PoolConfig::default()
        })
    }

    #[test]
    fn decodes_body_larger_than_chunk() {
        let body: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let out = gunzip(&pools(), &gzip(&body), usize::MAX).unwrap();
        assert_eq!(&out[..], &body[..]);
    }

    #[test]
    fn decodes_concatenated_members() {
        let mut input = gzip(br#"{"a":"#);
        input.extend(gzip(br#"1}"#));
        let out = gunzip(&pools(), &input, 1024).unwrap();
        assert_eq!(&out[..], br#"{"a":1}"#);
    }

    #[test]
    fn honors_optional_header_fields() {
        let mut enc = GzBuilder::new()
            .filename("body.json")
            .comment("test")
            .extra(vec![1, 2, 3])
            .write(Vec::new(), Compression::fast());
        enc.write_all(b"{}").unwrap();
        let input = enc.finish().unwrap();

        let out = gunzip(&pools(), &input, 1024).unwrap();
        assert_eq!(&out[..], b"{}");
    }

    #[test]
    fn rejects_truncated_stream() {
        let input = gzip(b"hello world hello world");
        let err = gunzip(&pools(), &input[..input.len() - 4], 1024).unwrap_err();
        assert!(matches!(err, GzipError::Truncated));
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let mut input = gzip(b"hello");
        let n = input.len();
        input[n - 8] ^= 0xff;
        let err = gunzip(&pools(), &input, 1024).unwrap_err();
        assert!(matches!(err, GzipError::Trailer("crc32")));
    }

    #[test]
    fn rejects_plain_bytes() {
        let err = gunzip(&pools(), br#"{"model":"m"}"#, 1024).unwrap_err();
        assert!(matches!(err, GzipError::Header(_)));
    }

    #[test]
    fn enforces_limit() {
        let err = gunzip(&pools(), &gzip(&[b'a'; 4096]), 100).unwrap_err();
        assert!(matches!(err, GzipError::TooLarge { limit: 100 }));
    }

    #[test]
    fn resources_return_to_pools_on_error() {
        let pools = pools();
        let _ = gunzip(&pools, b"not gzip at all", 1024);
        assert_eq!(pools.decoders.stats().outstanding(), 0);
        assert_eq!(pools.chunks.stats().outstanding(), 0);
        assert_eq!(pools.buffers.stats().outstanding(), 0);
    }

    #[test]
    fn detects_encoding_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip_encoded(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(is_gzip_encoded(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(!is_gzip_encoded(&headers));
    }
}
