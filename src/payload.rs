//! Streamed payload generation for the `/data` endpoint
//!
//! A payload of `N` bytes is a single `|` marker followed by `N - 1` bytes
//! cycling through [`CHARSET`]. The bytes are produced lazily in bounded
//! chunks sliced out of one shared pattern buffer, so arbitrarily large
//! payloads stream in constant memory.

use futures::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Bytes, Frame};
use std::iter::FusedIterator;
use std::sync::OnceLock;
use thiserror::Error;

/// Leading byte of every non-empty payload
pub const MARKER: u8 = b'|';

/// Alphabet cycled after the marker
pub const CHARSET: &[u8; 27] = b"-ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Maximum size of a single emitted chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Unit of the `size` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Kb,
    Mb,
    Gb,
    Tb,
}

impl SizeUnit {
    /// Number of bytes in one unit
    pub fn multiplier(&self) -> u64 {
        match self {
            SizeUnit::Kb => 1 << 10,
            SizeUnit::Mb => 1 << 20,
            SizeUnit::Gb => 1 << 30,
            SizeUnit::Tb => 1 << 40,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeUnit::Kb => "kb",
            SizeUnit::Mb => "mb",
            SizeUnit::Gb => "gb",
            SizeUnit::Tb => "tb",
        }
    }
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SizeUnit {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kb" => Ok(SizeUnit::Kb),
            "mb" => Ok(SizeUnit::Mb),
            "gb" => Ok(SizeUnit::Gb),
            "tb" => Ok(SizeUnit::Tb),
            other => Err(PayloadError::InvalidUnit(other.to_string())),
        }
    }
}

/// Validation failures for `/data` parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("missing required query parameter 'size'")]
    MissingSize,
    #[error("missing required query parameter 'unit'")]
    MissingUnit,
    #[error("size must be an integer, got {0:?}")]
    InvalidSize(String),
    #[error("size must be greater than 0")]
    NonPositiveSize,
    #[error("unit must be one of 'kb', 'mb', 'gb', 'tb', got {0:?}")]
    InvalidUnit(String),
    #[error("requested payload of {size}{unit} exceeds the maximum representable size")]
    TooLarge { size: u64, unit: SizeUnit },
}

impl PayloadError {
    /// Whether the error is caused by an absent parameter
    pub fn is_missing(&self) -> bool {
        matches!(self, PayloadError::MissingSize | PayloadError::MissingUnit)
    }
}

/// A validated request for a generated payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRequest {
    pub size: u64,
    pub unit: SizeUnit,
}

impl PayloadRequest {
    /// Validate raw `size` and `unit` query values
    pub fn from_params(size: Option<&str>, unit: Option<&str>) -> Result<Self, PayloadError> {
        let size = size.ok_or(PayloadError::MissingSize)?;
        let unit = unit.ok_or(PayloadError::MissingUnit)?;

        let size: i64 = size
            .trim()
            .parse()
            .map_err(|_| PayloadError::InvalidSize(size.to_string()))?;
        if size <= 0 {
            return Err(PayloadError::NonPositiveSize);
        }
        let unit: SizeUnit = unit.parse()?;

        let request = Self {
            size: size as u64,
            unit,
        };
        request.byte_len()?;
        Ok(request)
    }

    /// Total payload length in bytes
    pub fn byte_len(&self) -> Result<u64, PayloadError> {
        self.size
            .checked_mul(self.unit.multiplier())
            .ok_or(PayloadError::TooLarge {
                size: self.size,
                unit: self.unit,
            })
    }
}

/// Shared buffer of the cycled alphabet, long enough to slice a full chunk
/// starting at any alphabet offset
fn pattern() -> Bytes {
    static PATTERN: OnceLock<Bytes> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            let len = CHUNK_SIZE + CHARSET.len();
            Bytes::from(CHARSET.iter().copied().cycle().take(len).collect::<Vec<u8>>())
        })
        .clone()
}

/// Lazy generator yielding a payload as a sequence of chunks
#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    remaining: u64,
    marker_pending: bool,
    offset: usize,
    pattern: Bytes,
}

impl PayloadGenerator {
    /// Create a generator for exactly `len` bytes
    pub fn new(len: u64) -> Self {
        Self {
            remaining: len,
            marker_pending: len > 0,
            offset: 0,
            pattern: pattern(),
        }
    }

    /// Bytes not yet emitted
    pub fn remaining_bytes(&self) -> u64 {
        self.remaining
    }

    /// Adapt the generator into a streaming response body
    pub fn into_body(self) -> BoxBody<Bytes, hyper::Error> {
        let frames = self.map(|chunk| Ok::<_, hyper::Error>(Frame::data(chunk)));
        StreamBody::new(stream::iter(frames)).boxed()
    }
}

impl Iterator for PayloadGenerator {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }

        if self.marker_pending {
            self.marker_pending = false;
            self.remaining -= 1;
            return Some(Bytes::from_static(b"|"));
        }

        let len = self.remaining.min(CHUNK_SIZE as u64) as usize;
        let chunk = self.pattern.slice(self.offset..self.offset + len);
        self.offset = (self.offset + len) % CHARSET.len();
        self.remaining -= len as u64;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let body = self.remaining - u64::from(self.marker_pending);
        let chunks = body.div_ceil(CHUNK_SIZE as u64) + u64::from(self.marker_pending);
        match usize::try_from(chunks) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl FusedIterator for PayloadGenerator {}
