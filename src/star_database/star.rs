use crate::error::{Error, Result};

use super::search::{LeafDecoder, SearchData};

/// A catalog star as stored in the leaf blocks of a star database.
///
/// Positions are ICRS degrees at the catalog epoch. The magnitude is a generic
/// brightness value whose band is catalog dependent; `flags` carries
/// catalog-specific bits matched by the search flag filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Star {
    pub id: u64,
    pub ra: f64,
    pub dec: f64,
    pub mag: f32,
    pub flags: u32,
}

impl Star {
    /// Size of an encoded record.
    pub const RECORD_SIZE: usize = 32;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.ra.to_le_bytes());
        out.extend_from_slice(&self.dec.to_le_bytes());
        out.extend_from_slice(&self.mag.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < Self::RECORD_SIZE {
            return Err(Error::CorruptedData(format!("truncated star record ({} bytes)", record.len())));
        }
        let b8 = |i: usize| -> [u8; 8] { std::array::from_fn(|k| record[i + k]) };
        let b4 = |i: usize| -> [u8; 4] { std::array::from_fn(|k| record[i + k]) };
        Ok(Self {
            id: u64::from_le_bytes(b8(0)),
            ra: f64::from_le_bytes(b8(8)),
            dec: f64::from_le_bytes(b8(16)),
            mag: f32::from_le_bytes(b4(24)),
            flags: u32::from_le_bytes(b4(28)),
        })
    }
}

/// Leaf decoder for blocks of packed [`Star`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarRecordDecoder;

impl LeafDecoder for StarRecordDecoder {
    type Item = Star;

    fn decode_leaf(&self, block: &[u8], search: &mut SearchData<Star>) -> Result<()> {
        if block.len() % Star::RECORD_SIZE != 0 {
            return Err(Error::CorruptedData(format!(
                "leaf block of {} bytes is not a whole number of star records",
                block.len()
            )));
        }
        for record in block.chunks_exact(Star::RECORD_SIZE) {
            let star = Star::decode(record)?;
            let config = &search.config;
            if config.accepts_magnitude(star.mag as f64)
                && config.accepts_flags(star.flags)
                && config.contains(star.ra, star.dec)
            {
                search.push(star);
            }
        }
        Ok(())
    }
}
