//! Compression codecs for dump files
//!
//! | Codec | Option | Suffix |
//! |-------|--------|--------|
//! | none  | `none` | |
//! | gzip  | `gzip` or `gzip;level=N` (1-9) | `.gz` |
//! | zstd  | `zstd` or `zstd;level=N` (1-22) | `.zst` |
//!
//! Codecs work incrementally on in-memory buffers so they can sit between a row
//! formatter and any [`WriteStream`], or between any [`ReadStream`] and a
//! line splitter.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression as GzipLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::storage::{ReadStream, WriteStream};

/// Compression algorithm and level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    /// Plain text
    None,
    /// Gzip with level 1-9
    Gzip { level: u32 },
    /// Zstandard with level 1-22
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd {
            level: Self::DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Compression {
    pub const DEFAULT_GZIP_LEVEL: u32 = 1;
    pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

    /// File name suffix, including the dot
    pub fn extension_suffix(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip { .. } => ".gz",
            Self::Zstd { .. } => ".zst",
        }
    }

    /// Algorithm name without level
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip { .. } => "gzip",
            Self::Zstd { .. } => "zstd",
        }
    }

    /// Whether compression is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Codec matching a file name suffix
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".zst") {
            Self::Zstd {
                level: Self::DEFAULT_ZSTD_LEVEL,
            }
        } else if name.ends_with(".gz") {
            Self::Gzip {
                level: Self::DEFAULT_GZIP_LEVEL,
            }
        } else {
            Self::None
        }
    }

    /// Create an incremental encoder
    pub fn encoder(&self) -> Result<Encoder> {
        Ok(match *self {
            Self::None => Encoder::Plain,
            Self::Gzip { level } => {
                Encoder::Gzip(GzEncoder::new(Vec::new(), GzipLevel::new(level)))
            }
            Self::Zstd { level } => Encoder::Zstd(
                zstd::stream::write::Encoder::new(Vec::new(), level)
                    .map_err(|e| Error::compression(format!("zstd encoder: {}", e)))?,
            ),
        })
    }

    /// Create an incremental decoder
    pub fn decoder(&self) -> Result<Decoder> {
        Ok(match self {
            Self::None => Decoder::Plain,
            Self::Gzip { .. } => Decoder::Gzip(GzDecoder::new(Vec::new())),
            Self::Zstd { .. } => Decoder::Zstd(
                zstd::stream::write::Decoder::new(Vec::new())
                    .map_err(|e| Error::compression(format!("zstd decoder: {}", e)))?,
            ),
        })
    }

    /// Compress a whole buffer
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = self.encoder()?;
        let mut out = encoder.encode(data)?;
        out.extend(encoder.finish()?);
        Ok(out)
    }

    /// Decompress a whole buffer
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = self.decoder()?;
        let mut out = decoder.decode(data)?;
        out.extend(decoder.finish()?);
        Ok(out)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gzip { level } if *level == Self::DEFAULT_GZIP_LEVEL => write!(f, "gzip"),
            Self::Gzip { level } => write!(f, "gzip;level={}", level),
            Self::Zstd { level } if *level == Self::DEFAULT_ZSTD_LEVEL => write!(f, "zstd"),
            Self::Zstd { level } => write!(f, "zstd;level={}", level),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split(';');
        let algorithm = parts.next().unwrap_or_default().trim().to_lowercase();
        let mut level: Option<i64> = None;
        for option in parts {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| Error::config(format!("Invalid compression option '{}'", option)))?;
            if key.trim() != "level" {
                return Err(Error::config(format!(
                    "Unknown compression option '{}'",
                    key.trim()
                )));
            }
            level = Some(value.trim().parse().map_err(|_| {
                Error::config(format!("Invalid compression level '{}'", value.trim()))
            })?);
        }

        match algorithm.as_str() {
            "none" | "" => {
                if level.is_some() {
                    return Err(Error::config("Compression 'none' does not accept a level"));
                }
                Ok(Self::None)
            }
            "gzip" => {
                let level = level.unwrap_or(Self::DEFAULT_GZIP_LEVEL as i64);
                if !(1..=9).contains(&level) {
                    return Err(Error::config(format!(
                        "gzip compression level must be between 1 and 9, got {}",
                        level
                    )));
                }
                Ok(Self::Gzip {
                    level: level as u32,
                })
            }
            "zstd" => {
                let level = level.unwrap_or(Self::DEFAULT_ZSTD_LEVEL as i64);
                if !(1..=22).contains(&level) {
                    return Err(Error::config(format!(
                        "zstd compression level must be between 1 and 22, got {}",
                        level
                    )));
                }
                Ok(Self::Zstd {
                    level: level as i32,
                })
            }
            other => Err(Error::config(format!(
                "Unknown compression '{}', expected none, gzip or zstd",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Incremental codecs
// ============================================================================

/// Incremental encoder producing compressed blocks
pub enum Encoder {
    Plain,
    Gzip(GzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl Encoder {
    /// Feed plain bytes, returning whatever compressed output is ready
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(data.to_vec()),
            Self::Gzip(enc) => {
                enc.write_all(data)
                    .map_err(|e| Error::compression(format!("gzip: {}", e)))?;
                Ok(std::mem::take(enc.get_mut()))
            }
            Self::Zstd(enc) => {
                enc.write_all(data)
                    .map_err(|e| Error::compression(format!("zstd: {}", e)))?;
                Ok(std::mem::take(enc.get_mut()))
            }
        }
    }

    /// Flush the trailer
    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(Vec::new()),
            Self::Gzip(enc) => enc
                .finish()
                .map_err(|e| Error::compression(format!("gzip: {}", e))),
            Self::Zstd(enc) => enc
                .finish()
                .map_err(|e| Error::compression(format!("zstd: {}", e))),
        }
    }
}

/// Incremental decoder producing plain blocks
pub enum Decoder {
    Plain,
    Gzip(GzDecoder<Vec<u8>>),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
}

impl Decoder {
    /// Feed compressed bytes, returning whatever plain output is ready
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(data.to_vec()),
            Self::Gzip(dec) => {
                dec.write_all(data)
                    .map_err(|e| Error::compression(format!("gzip: {}", e)))?;
                Ok(std::mem::take(dec.get_mut()))
            }
            Self::Zstd(dec) => {
                dec.write_all(data)
                    .map_err(|e| Error::compression(format!("zstd: {}", e)))?;
                Ok(std::mem::take(dec.get_mut()))
            }
        }
    }

    /// Flush whatever is still buffered
    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(Vec::new()),
            Self::Gzip(dec) => dec
                .finish()
                .map_err(|e| Error::compression(format!("gzip: {}", e))),
            Self::Zstd(mut dec) => {
                dec.flush()
                    .map_err(|e| Error::compression(format!("zstd: {}", e)))?;
                Ok(dec.into_inner())
            }
        }
    }
}

// ============================================================================
// Stream adapters
// ============================================================================

/// Writer that compresses into an inner [`WriteStream`]
pub struct CompressedWriter {
    inner: Box<dyn WriteStream>,
    encoder: Encoder,
    plain_bytes: u64,
}

impl CompressedWriter {
    pub fn new(inner: Box<dyn WriteStream>, compression: Compression) -> Result<Self> {
        Ok(Self {
            inner,
            encoder: compression.encoder()?,
            plain_bytes: 0,
        })
    }

    /// Uncompressed bytes accepted so far
    pub fn plain_bytes(&self) -> u64 {
        self.plain_bytes
    }
}

#[async_trait]
impl WriteStream for CompressedWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.plain_bytes += data.len() as u64;
        let out = self.encoder.encode(data)?;
        if !out.is_empty() {
            self.inner.write(&out).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let this = *self;
        let mut inner = this.inner;
        let tail = this.encoder.finish()?;
        if !tail.is_empty() {
            inner.write(&tail).await?;
        }
        inner.finish().await
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.inner.abort().await
    }

    fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }
}

/// Reader that decompresses an inner [`ReadStream`]
pub struct DecompressingReader {
    inner: Box<dyn ReadStream>,
    decoder: Option<Decoder>,
}

impl DecompressingReader {
    pub fn new(inner: Box<dyn ReadStream>, compression: Compression) -> Result<Self> {
        Ok(Self {
            inner,
            decoder: Some(compression.decoder()?),
        })
    }
}

#[async_trait]
impl ReadStream for DecompressingReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(None);
            };
            match self.inner.read_chunk().await? {
                Some(chunk) => {
                    let out = decoder.decode(&chunk)?;
                    if !out.is_empty() {
                        return Ok(Some(Bytes::from(out)));
                    }
                }
                None => {
                    let tail = match self.decoder.take() {
                        Some(decoder) => decoder.finish()?,
                        None => Vec::new(),
                    };
                    return Ok((!tail.is_empty()).then(|| Bytes::from(tail)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compression() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!(
            "zstd".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 1 }
        );
        assert_eq!(
            "gzip;level=9".parse::<Compression>().unwrap(),
            Compression::Gzip { level: 9 }
        );
        assert_eq!(
            "zstd; level=19".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 19 }
        );
        assert!("gzip;level=10".parse::<Compression>().is_err());
        assert!("lz4".parse::<Compression>().is_err());
        assert!("zstd;speed=1".parse::<Compression>().is_err());
        assert!("none;level=1".parse::<Compression>().is_err());
    }

    #[test]
    fn test_default_is_zstd() {
        let c = Compression::default();
        assert_eq!(c, Compression::Zstd { level: Compression::DEFAULT_ZSTD_LEVEL });
        assert_eq!(c.extension_suffix(), ".zst");
    }

    #[test]
    fn test_display_is_parseable() {
        for c in [
            Compression::None,
            Compression::Gzip { level: 1 },
            Compression::Gzip { level: 6 },
            Compression::Zstd { level: 12 },
        ] {
            assert_eq!(c.to_string().parse::<Compression>().unwrap(), c);
        }
    }

    #[test]
    fn test_incremental_codecs() {
        let payload: Vec<u8> = (0..200_000u32)
            .flat_map(|i| format!("{}\trow {}\n", i, i % 97).into_bytes())
            .collect();

        for c in [Compression::Gzip { level: 1 }, Compression::Zstd { level: 3 }] {
            let mut encoder = c.encoder().unwrap();
            let mut compressed = Vec::new();
            for block in payload.chunks(4096) {
                compressed.extend(encoder.encode(block).unwrap());
            }
            compressed.extend(encoder.finish().unwrap());
            assert!(compressed.len() < payload.len());

            let mut decoder = c.decoder().unwrap();
            let mut plain = Vec::new();
            for block in compressed.chunks(1000) {
                plain.extend(decoder.decode(block).unwrap());
            }
            plain.extend(decoder.finish().unwrap());
            assert_eq!(plain, payload);
        }
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(Compression::from_file_name("s.t@0.tsv").algorithm(), "none");
        assert_eq!(Compression::from_file_name("s.t@0.tsv.gz").algorithm(), "gzip");
        assert_eq!(Compression::from_file_name("s.t@@1.tsv.zst").algorithm(), "zstd");
    }
}
