//! XPSD point source databases.
//!
//! An XPSD file stores a star catalog spatially indexed by one or more
//! quadtrees, each built in its own projection of the sky. The layout is:
//!
//! ```text
//! 0        "XPSD0100" signature, header length L, reserved (24 bytes)
//! 24       UTF-8 XML header (L bytes)
//! 24 + L   packed 48-byte node arrays, one per tree
//!          data block: leaf blocks of encoded sources, optionally compressed
//! ```
//!
//! Cone searches descend every tree, keep the nodes whose unprojected
//! rectangle meets the cone, and hand the leaf blocks they reach to a
//! [`LeafDecoder`] which applies the magnitude, flag and source limit filters.

mod format;
mod header;
mod projection;
mod search;
mod star;
mod writer;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info};

pub use format::{Compression, CompressionCodec, Node, NodeKind, NODE_SIZE, SIGNATURE_SIZE};
pub use header::{DataDescriptor, Header, Metadata, Statistics, TreeDescriptor};
pub use projection::{TreeProjection, TreeProjectionKind};
pub use search::{LeafDecoder, SearchConfig, SearchData};
pub use star::{Star, StarRecordDecoder};
pub use writer::{StarDatabaseWriter, StarDatabaseWriterConfig, TreeLayout};

use crate::error::{Error, Result};
use search::node_intersects_cone;

/// An open XPSD database.
///
/// Leaf blocks are read on demand from the underlying reader, so searches
/// take `&mut self`.
#[derive(Debug)]
pub struct StarDatabaseFile<R = File> {
    reader: R,
    header: Header,
    /// Node arrays, one per tree, in header order.
    nodes: Vec<Vec<Node>>,
}

impl StarDatabaseFile<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Self::from_reader(File::open(path)?)?;
        info!(
            "Opened star database {} ({} sources in {} trees)",
            path.display(),
            db.header.statistics.total_sources,
            db.header.trees.len()
        );
        Ok(db)
    }
}

impl<R: Read + Seek> StarDatabaseFile<R> {
    /// Read the signature, header and node arrays from `reader`.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut signature = [0u8; SIGNATURE_SIZE];
        reader
            .read_exact(&mut signature)
            .map_err(|_| Error::CorruptedData("file too short for an XPSD signature".into()))?;
        let length = format::decode_signature(&signature)?;
        let header_end = SIGNATURE_SIZE as u64 + length as u64;
        if header_end > file_size {
            return Err(Error::CorruptedData(format!(
                "XML header of {length} bytes exceeds the file size {file_size}"
            )));
        }

        let mut xml = vec![0u8; length as usize];
        reader.read_exact(&mut xml)?;
        let text = std::str::from_utf8(&xml).map_err(|e| Error::Parse(format!("XPSD header is not UTF-8: {e}")))?;
        // Writers may pad the header with trailing NULs.
        let header = Header::parse(text.trim_end_matches('\0'))?;

        if header.data.position < header_end || header.data.position > file_size {
            return Err(Error::CorruptedData(format!(
                "data block position {} outside [{header_end}, {file_size}]",
                header.data.position
            )));
        }

        let mut nodes = Vec::with_capacity(header.trees.len());
        for (t, tree) in header.trees.iter().enumerate() {
            let size = tree.node_count as u64 * NODE_SIZE as u64;
            if tree.position < header_end || tree.position + size > file_size {
                return Err(Error::CorruptedData(format!(
                    "tree {t}: node array at {} ({size} bytes) outside the file",
                    tree.position
                )));
            }
            let mut bytes = vec![0u8; size as usize];
            reader.seek(SeekFrom::Start(tree.position))?;
            reader.read_exact(&mut bytes)?;
            let tree_nodes = bytes
                .chunks_exact(NODE_SIZE)
                .map(Node::decode)
                .collect::<Result<Vec<_>>>()?;
            check_nodes(t, &tree_nodes, header.data.position, file_size)?;
            nodes.push(tree_nodes);
        }
        debug!(
            "XPSD header: {} trees, {} nodes, data block at {}",
            header.trees.len(),
            nodes.iter().map(Vec::len).sum::<usize>(),
            header.data.position
        );

        Ok(Self { reader, header, nodes })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn metadata(&self) -> &Metadata {
        &self.header.metadata
    }

    pub fn statistics(&self) -> &Statistics {
        &self.header.statistics
    }

    pub fn data(&self) -> &DataDescriptor {
        &self.header.data
    }

    pub fn trees(&self) -> &[TreeDescriptor] {
        &self.header.trees
    }

    /// Packed nodes of tree `tree`, root first.
    pub fn nodes(&self, tree: usize) -> &[Node] {
        self.nodes.get(tree).map_or(&[], Vec::as_slice)
    }

    /// Uncompressed contents of a leaf node.
    pub fn load_leaf(&mut self, node: &Node) -> Result<Vec<u8>> {
        let NodeKind::Leaf {
            offset,
            stored_size,
            compressed_size,
        } = node.kind
        else {
            return Err(Error::IncompatibleInputs("not a leaf node".into()));
        };
        let mut block = vec![0u8; compressed_size as usize];
        self.reader.seek(SeekFrom::Start(self.header.data.position + offset))?;
        self.reader.read_exact(&mut block)?;
        if compressed_size == stored_size {
            return Ok(block);
        }
        let data = &self.header.data;
        let compression = data
            .compression
            .ok_or_else(|| Error::CorruptedData("compressed leaf block without a compression codec".into()))?;
        compression.uncompress(&block, stored_size as usize, data.item_size)
    }

    /// Cone search over every tree.
    pub fn search<D: LeafDecoder>(&mut self, config: SearchConfig, decoder: &D) -> Result<SearchData<D::Item>> {
        let mut search = SearchData::new(config);
        let data = self.header.data;
        if config.magnitude_high < data.magnitude_low || config.magnitude_low > data.magnitude_high {
            return Ok(search);
        }
        if !(config.radius > 0.0) || !(-90.0..=90.0).contains(&config.center_dec) {
            return Err(Error::OutOfRange {
                what: "cone search",
                value: if config.radius > 0.0 { config.center_dec } else { config.radius },
            });
        }

        for t in 0..self.nodes.len() {
            let projection = self.header.trees[t].projection;
            if self.nodes[t].is_empty() {
                continue;
            }
            let mut stack = vec![0usize];
            while let Some(i) = stack.pop() {
                let node = self.nodes[t][i];
                search.nodes_visited += 1;
                if !node_intersects_cone(&projection, &node.rect, &config) {
                    continue;
                }
                match node.kind {
                    NodeKind::Structural(children) => {
                        // Reversed so that NW is visited first.
                        stack.extend(children.iter().rev().filter(|&&c| c != 0).map(|&c| c as usize));
                    }
                    NodeKind::Leaf { .. } => {
                        let block = self.load_leaf(&node)?;
                        search.leaves_loaded += 1;
                        decoder.decode_leaf(&block, &mut search)?;
                    }
                }
            }
        }
        debug!(
            "Cone search ({:.4}, {:.4}) r={:.4}: {} sources, {} nodes visited, {} leaves loaded",
            config.center_ra,
            config.center_dec,
            config.radius,
            search.results.len(),
            search.nodes_visited,
            search.leaves_loaded
        );
        Ok(search)
    }

    /// Cone search decoding [`Star`] records.
    pub fn search_stars(&mut self, config: SearchConfig) -> Result<SearchData<Star>> {
        self.search(config, &StarRecordDecoder)
    }
}

/// Child indexes must point forward within the array and leaf blocks must
/// lie inside the data block.
fn check_nodes(tree: usize, nodes: &[Node], data_position: u64, file_size: u64) -> Result<()> {
    for (i, node) in nodes.iter().enumerate() {
        match node.kind {
            NodeKind::Structural(children) => {
                if let Some(&c) = children
                    .iter()
                    .find(|&&c| c != 0 && (c as usize <= i || c as usize >= nodes.len()))
                {
                    return Err(Error::CorruptedData(format!(
                        "tree {tree}: node {i} links to invalid child {c}"
                    )));
                }
            }
            NodeKind::Leaf {
                offset,
                compressed_size,
                ..
            } => {
                if data_position + offset + compressed_size as u64 > file_size {
                    return Err(Error::CorruptedData(format!(
                        "tree {tree}: leaf {i} block extends past the end of the file"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stars() -> Vec<Star> {
        (0..200)
            .map(|i| Star {
                id: i,
                ra: (i as f64 * 1.7).rem_euclid(360.0),
                dec: -60.0 + (i as f64 * 0.6),
                mag: 4.0 + (i % 10) as f32,
                flags: (i % 3) as u32,
            })
            .collect()
    }

    fn database(config: StarDatabaseWriterConfig) -> StarDatabaseFile<Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        StarDatabaseWriter::new(config).write(&stars(), &mut bytes).unwrap();
        StarDatabaseFile::from_reader(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn search_matches_brute_force() {
        for compression in [None, Compression::parse("zlib+sh").ok()] {
            let mut db = database(StarDatabaseWriterConfig {
                bucket_capacity: 16,
                compression,
                ..StarDatabaseWriterConfig::default()
            });
            assert_eq!(db.statistics().total_sources, 200);
            let config = SearchConfig::new(85.0, -30.0, 10.0);
            let found = db.search_stars(config).unwrap();
            let expected = stars().iter().filter(|s| config.contains(s.ra, s.dec)).count();
            assert!(expected > 0);
            assert_eq!(found.results.len(), expected);
            assert!(found.leaves_loaded < db.statistics().total_leaves as usize);
        }
    }

    #[test]
    fn magnitude_range_outside_database() {
        let mut db = database(StarDatabaseWriterConfig::default());
        let mut config = SearchConfig::new(0.0, 0.0, 30.0);
        config.magnitude_low = 20.0;
        let found = db.search_stars(config).unwrap();
        assert!(found.results.is_empty());
        assert_eq!(found.nodes_visited, 0);
    }

    #[test]
    fn rejects_corrupted_files() {
        let mut bytes = Vec::new();
        StarDatabaseWriter::default().write(&stars(), &mut bytes).unwrap();

        let mut bad = bytes.clone();
        bad[5] = b'2';
        assert!(matches!(
            StarDatabaseFile::from_reader(Cursor::new(bad)),
            Err(Error::CorruptedData(_))
        ));
        let truncated = bytes[..bytes.len() - 10].to_vec();
        assert!(StarDatabaseFile::from_reader(Cursor::new(truncated)).is_err());
        assert!(StarDatabaseFile::from_reader(Cursor::new(b"XPSD".to_vec())).is_err());
    }
}
