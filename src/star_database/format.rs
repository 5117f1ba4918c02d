//! Binary layout of XPSD files: the 24-byte signature, packed tree nodes and
//! leaf block compression.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::geometry::Rect;

pub const MAGIC: &[u8; 8] = b"XPSD0100";
pub const SIGNATURE_SIZE: usize = 24;
/// Shortest XML header a valid file can carry.
pub const MIN_HEADER_LENGTH: u32 = 65;
pub const NODE_SIZE: usize = 48;

const LEAF_FLAG: u64 = 1 << 63;

/// Signature block preceding the XML header.
pub fn encode_signature(header_length: u32) -> [u8; SIGNATURE_SIZE] {
    let mut s = [0u8; SIGNATURE_SIZE];
    s[..8].copy_from_slice(MAGIC);
    s[8..12].copy_from_slice(&header_length.to_le_bytes());
    s
}

/// Validate a signature block and return the XML header length.
pub fn decode_signature(bytes: &[u8; SIGNATURE_SIZE]) -> Result<u32> {
    if &bytes[..4] != b"XPSD" {
        return Err(Error::CorruptedData("not an XPSD file".into()));
    }
    if bytes[4..8] != MAGIC[4..] {
        return Err(Error::CorruptedData(format!(
            "unsupported XPSD version '{}'",
            String::from_utf8_lossy(&bytes[4..8])
        )));
    }
    let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if length < MIN_HEADER_LENGTH {
        return Err(Error::CorruptedData(format!("invalid XML header length {length}")));
    }
    Ok(length)
}

// ── Tree nodes ──────────────────────────────────────────────────────────────

/// Payload of a packed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Child node indexes (NW, NE, SW, SE); zero marks a missing child.
    Structural([u32; 4]),
    /// Leaf block at `offset` bytes from the start of the data block.
    Leaf {
        offset: u64,
        stored_size: u32,
        compressed_size: u32,
    },
}

/// A 48-byte tree node: a rectangle in projected coordinates plus a payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub rect: Rect,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for v in [self.rect.x0, self.rect.y0, self.rect.x1, self.rect.y1] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        match self.kind {
            NodeKind::Structural(children) => {
                for c in children {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            NodeKind::Leaf {
                offset,
                stored_size,
                compressed_size,
            } => {
                out.extend_from_slice(&(offset | LEAF_FLAG).to_le_bytes());
                out.extend_from_slice(&stored_size.to_le_bytes());
                out.extend_from_slice(&compressed_size.to_le_bytes());
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NODE_SIZE {
            return Err(Error::CorruptedData(format!("truncated tree node ({} bytes)", bytes.len())));
        }
        let f = |i: usize| f64::from_le_bytes(le_array(&bytes[i * 8..i * 8 + 8]));
        let u = |i: usize| u32::from_le_bytes(le_array(&bytes[32 + i * 4..36 + i * 4]));
        let head = u64::from_le_bytes(le_array(&bytes[32..40]));
        let kind = if head & LEAF_FLAG != 0 {
            NodeKind::Leaf {
                offset: head & !LEAF_FLAG,
                stored_size: u(2),
                compressed_size: u(3),
            }
        } else {
            NodeKind::Structural([u(0), u(1), u(2), u(3)])
        };
        let rect = Rect {
            x0: f(0),
            y0: f(1),
            x1: f(2),
            y1: f(3),
        };
        if !(rect.x0 <= rect.x1 && rect.y0 <= rect.y1) {
            return Err(Error::CorruptedData("tree node with an invalid rectangle".into()));
        }
        Ok(Self { rect, kind })
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut a = [0u8; N];
    a.copy_from_slice(bytes);
    a
}

// ── Compression ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    Lz4,
    Lz4Hc,
    Zlib,
}

/// Leaf block compression: a codec plus optional byte shuffling by item size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub codec: CompressionCodec,
    pub shuffle: bool,
}

impl Compression {
    /// Parse a codec name such as `lz4`, `lz4-hc+sh` or `zlib`.
    pub fn parse(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let (codec, shuffle) = match lower.strip_suffix("+sh") {
            Some(codec) => (codec, true),
            None => (lower.as_str(), false),
        };
        let codec = match codec {
            "lz4" => CompressionCodec::Lz4,
            "lz4-hc" | "lz4hc" => CompressionCodec::Lz4Hc,
            "zlib" => CompressionCodec::Zlib,
            _ => return Err(Error::UnsupportedCompression(name.to_string())),
        };
        Ok(Self { codec, shuffle })
    }

    pub fn name(&self) -> String {
        let codec = match self.codec {
            CompressionCodec::Lz4 => "lz4",
            CompressionCodec::Lz4Hc => "lz4-hc",
            CompressionCodec::Zlib => "zlib",
        };
        if self.shuffle {
            format!("{codec}+sh")
        } else {
            codec.to_string()
        }
    }

    pub fn compress(&self, data: &[u8], item_size: usize) -> Result<Vec<u8>> {
        let shuffled;
        let input = if self.shuffle {
            shuffled = shuffle(data, item_size);
            &shuffled
        } else {
            data
        };
        match self.codec {
            // lz4_flex has no high-compression mode; its block format is
            // readable by any lz4 decoder.
            CompressionCodec::Lz4 | CompressionCodec::Lz4Hc => Ok(lz4_flex::block::compress(input)),
            CompressionCodec::Zlib => {
                let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn uncompress(&self, data: &[u8], uncompressed_size: usize, item_size: usize) -> Result<Vec<u8>> {
        let raw = match self.codec {
            CompressionCodec::Lz4 | CompressionCodec::Lz4Hc => lz4_flex::block::decompress(data, uncompressed_size)
                .map_err(|e| Error::CorruptedData(format!("lz4 leaf block: {e}")))?,
            CompressionCodec::Zlib => {
                let mut raw = Vec::with_capacity(uncompressed_size);
                flate2::read::ZlibDecoder::new(data).read_to_end(&mut raw)?;
                raw
            }
        };
        if raw.len() != uncompressed_size {
            return Err(Error::CorruptedData(format!(
                "leaf block uncompressed to {} bytes, expected {uncompressed_size}",
                raw.len()
            )));
        }
        Ok(if self.shuffle { unshuffle(&raw, item_size) } else { raw })
    }
}

/// Group byte `k` of every item together. Trailing bytes that do not fill an
/// item are kept in place.
pub fn shuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let n = data.len() / item_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..n {
        for k in 0..item_size {
            out[k * n + i] = data[i * item_size + k];
        }
    }
    out[n * item_size..].copy_from_slice(&data[n * item_size..]);
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(data: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || data.len() < item_size {
        return data.to_vec();
    }
    let n = data.len() / item_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..n {
        for k in 0..item_size {
            out[i * item_size + k] = data[k * n + i];
        }
    }
    out[n * item_size..].copy_from_slice(&data[n * item_size..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_checks() {
        let s = encode_signature(120);
        assert_eq!(decode_signature(&s).unwrap(), 120);

        let mut bad = s;
        bad[0] = b'Y';
        assert!(matches!(decode_signature(&bad), Err(Error::CorruptedData(_))));
        let mut old = s;
        old[4..8].copy_from_slice(b"0090");
        assert!(decode_signature(&old).is_err());
        assert!(decode_signature(&encode_signature(64)).is_err());
    }

    #[test]
    fn node_layout() {
        let leaf = Node {
            rect: Rect::new(-1.0, -2.0, 3.0, 4.0),
            kind: NodeKind::Leaf {
                offset: 1234,
                stored_size: 320,
                compressed_size: 200,
            },
        };
        let structural = Node {
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            kind: NodeKind::Structural([1, 0, 7, 9]),
        };
        let mut bytes = Vec::new();
        leaf.encode(&mut bytes);
        structural.encode(&mut bytes);
        assert_eq!(bytes.len(), 2 * NODE_SIZE);
        assert_eq!(bytes[39] & 0x80, 0x80);
        assert_eq!(Node::decode(&bytes[..NODE_SIZE]).unwrap(), leaf);
        assert_eq!(Node::decode(&bytes[NODE_SIZE..]).unwrap(), structural);
        assert!(Node::decode(&bytes[..40]).is_err());
    }

    #[test]
    fn codec_names() {
        let c = Compression::parse("LZ4-HC+sh").unwrap();
        assert_eq!(c.codec, CompressionCodec::Lz4Hc);
        assert!(c.shuffle);
        assert_eq!(c.name(), "lz4-hc+sh");
        assert!(matches!(Compression::parse("zstd"), Err(Error::UnsupportedCompression(_))));
    }

    #[test]
    fn shuffle_groups_bytes() {
        let data: Vec<u8> = (0..11).collect();
        let s = shuffle(&data, 4);
        assert_eq!(&s[..8], &[0, 4, 1, 5, 2, 6, 3, 7]);
        assert_eq!(&s[8..], &[8, 9, 10]);
        assert_eq!(unshuffle(&s, 4), data);
    }

    #[test]
    fn codecs_restore_blocks() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i / 7).to_le_bytes()).collect();
        for name in ["lz4", "lz4+sh", "zlib", "zlib+sh"] {
            let c = Compression::parse(name).unwrap();
            let packed = c.compress(&data, 4).unwrap();
            assert!(packed.len() < data.len(), "{name}");
            assert_eq!(c.uncompress(&packed, data.len(), 4).unwrap(), data);
        }
    }
}
