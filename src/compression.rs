use std::io::Error as IoError;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::consts::*;
use super::error::{Error, Result};

/// Compression policy applied to every sector of an added file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Store sectors as-is.
    None,
    /// DEFLATE with a zlib wrapper.
    Zlib,
    /// bzip2.
    Bzip2,
    /// Try every supported method per sector and keep the smallest output.
    Smallest,
}

impl Default for Compression {
    fn default() -> Compression {
        Compression::Zlib
    }
}

fn compress_zlib(data: &[u8]) -> std::result::Result<Vec<u8>, IoError> {
    let mut encoder = ZlibEncoder::new(vec![COMPRESSION_ZLIB], flate2::Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

fn compress_bzip2(data: &[u8]) -> std::result::Result<Vec<u8>, IoError> {
    let mut encoder =
        bzip2::write::BzEncoder::new(vec![COMPRESSION_BZIP2], bzip2::Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Compresses one block. The result carries the compression mask as its first
/// byte, and is only returned when it is strictly smaller than `data`,
/// otherwise the block must be stored raw.
pub(crate) fn compress_block(data: &[u8], policy: Compression) -> Result<Option<Vec<u8>>> {
    let compressed = match policy {
        Compression::None => return Ok(None),
        Compression::Zlib => compress_zlib(data)?,
        Compression::Bzip2 => compress_bzip2(data)?,
        Compression::Smallest => {
            let zlib = compress_zlib(data)?;
            let bzip2 = compress_bzip2(data)?;

            if bzip2.len() < zlib.len() {
                bzip2
            } else {
                zlib
            }
        }
    };

    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

fn read_limited<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(limit);
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt(format!("failed to decompress block: {}", e)))?;

    Ok(out)
}

/// Reverses [`compress_block`]. A block whose stored size equals
/// `uncompressed_size` was stored raw and is returned unchanged.
pub(crate) fn decompress_block(input: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    if input.len() == uncompressed_size {
        return Ok(input.to_vec());
    }

    if input.is_empty() {
        return Err(Error::corrupt("empty compressed block"));
    }

    let compression_type = input[0];

    if compression_type == COMPRESSION_LZMA {
        return Err(Error::UnsupportedCompression {
            kind: "LZMA".to_string(),
        });
    }

    let unsupported = [
        (COMPRESSION_IMA_ADCPM_MONO, "IMA ADCPM Mono"),
        (COMPRESSION_IMA_ADCPM_STEREO, "IMA ADCPM Stereo"),
        (COMPRESSION_HUFFMAN, "Huffman"),
        (COMPRESSION_PKWARE, "PKWare DCL"),
        (COMPRESSION_SPARSE, "Sparse"),
    ];

    for (mask, kind) in unsupported.iter() {
        if compression_type & mask != 0 {
            return Err(Error::UnsupportedCompression {
                kind: kind.to_string(),
            });
        }
    }

    if compression_type & (COMPRESSION_BZIP2 | COMPRESSION_ZLIB) == 0 {
        return Err(Error::corrupt(format!(
            "unknown compression mask {:#04x}",
            compression_type
        )));
    }

    let mut buf = input[1..].to_vec();

    if compression_type & COMPRESSION_BZIP2 != 0 {
        buf = read_limited(bzip2::read::BzDecoder::new(&buf[..]), uncompressed_size)?;
    }

    if compression_type & COMPRESSION_ZLIB != 0 {
        buf = read_limited(ZlibDecoder::new(&buf[..]), uncompressed_size)?;
    }

    if buf.len() != uncompressed_size {
        return Err(Error::corrupt(format!(
            "block decompressed to {} bytes, expected {}",
            buf.len(),
            uncompressed_size
        )));
    }

    Ok(buf)
}
