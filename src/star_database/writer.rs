//! Generation of XPSD databases from star lists.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::quadtree::{FlatNode, QuadTree, QuadTreeItem};

use super::format::{self, Compression, CompressionCodec, Node, NodeKind, NODE_SIZE, SIGNATURE_SIZE};
use super::header::{DataDescriptor, Header, Metadata, Statistics, TreeDescriptor};
use super::projection::{TreeProjection, TreeProjectionKind};
use super::star::Star;

/// Header layout passes before giving up on a stable length.
const MAX_LAYOUT_PASSES: usize = 16;

/// Partition of the sky into index trees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeLayout {
    /// A single equirectangular tree.
    Single,
    /// An equirectangular band `|dec| < boundary` plus two polar caps
    /// projected with `caps`.
    PolarCaps { boundary: f64, caps: TreeProjectionKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StarDatabaseWriterConfig {
    /// Maximum number of stars per leaf.
    pub bucket_capacity: usize,
    /// Leaf block compression, or `None` to store raw records.
    pub compression: Option<Compression>,
    pub metadata: Metadata,
    pub trees: TreeLayout,
}

impl Default for StarDatabaseWriterConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 256,
            compression: Some(Compression {
                codec: CompressionCodec::Lz4,
                shuffle: true,
            }),
            metadata: Metadata::default(),
            trees: TreeLayout::Single,
        }
    }
}

/// A star with its position in a tree projection.
#[derive(Debug, Clone)]
struct Projected {
    star: Star,
    p: Point,
}

impl QuadTreeItem for Projected {
    fn position(&self) -> Point {
        self.p
    }
}

/// Builds XPSD files.
#[derive(Debug, Clone, Default)]
pub struct StarDatabaseWriter {
    config: StarDatabaseWriterConfig,
}

impl StarDatabaseWriter {
    pub fn new(config: StarDatabaseWriterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StarDatabaseWriterConfig {
        &self.config
    }

    /// Write a database indexing `stars` to `path`.
    pub fn write_file(&self, stars: &[Star], path: impl AsRef<Path>) -> anyhow::Result<Statistics> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        let statistics = self
            .write(stars, &mut bytes)
            .with_context(|| format!("building star database {}", path.display()))?;
        std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        info!(
            "Saved star database to {} ({} sources, {} bytes)",
            path.display(),
            statistics.total_sources,
            bytes.len()
        );
        Ok(statistics)
    }

    /// Serialize a database indexing `stars` to `out`.
    pub fn write<W: Write>(&self, stars: &[Star], out: &mut W) -> Result<Statistics> {
        for s in stars {
            if !(0.0..360.0).contains(&s.ra) {
                return Err(Error::OutOfRange {
                    what: "star right ascension",
                    value: s.ra,
                });
            }
            if !(-90.0..=90.0).contains(&s.dec) {
                return Err(Error::OutOfRange {
                    what: "star declination",
                    value: s.dec,
                });
            }
            if !s.mag.is_finite() {
                return Err(Error::OutOfRange {
                    what: "star magnitude",
                    value: s.mag as f64,
                });
            }
        }

        let partitions = self.partition(stars)?;
        let item_size = Star::RECORD_SIZE;
        let mut statistics = Statistics {
            total_sources: stars.len() as u64,
            ..Statistics::default()
        };

        // Leaf blocks go to the data block in tree order; node arrays refer to
        // them by offset.
        let mut data_block = Vec::new();
        let mut node_arrays = Vec::with_capacity(partitions.len());
        for (projection, items) in &partitions {
            let tree: QuadTree<Projected> = QuadTree::build(items.clone(), self.config.bucket_capacity);
            let mut bytes = Vec::new();
            let flat = tree.flatten();
            for node in &flat {
                let packed = match node {
                    FlatNode::Structural { rect, children } => Node {
                        rect: *rect,
                        kind: NodeKind::Structural(*children),
                    },
                    FlatNode::Leaf { rect, points } => {
                        let mut raw = Vec::with_capacity(points.len() * item_size);
                        points.iter().for_each(|p| p.star.encode(&mut raw));
                        let stored = match &self.config.compression {
                            Some(c) => {
                                let packed = c.compress(&raw, item_size)?;
                                if packed.len() < raw.len() {
                                    packed
                                } else {
                                    raw.clone()
                                }
                            }
                            None => raw.clone(),
                        };
                        let kind = NodeKind::Leaf {
                            offset: data_block.len() as u64,
                            stored_size: block_size(raw.len())?,
                            compressed_size: block_size(stored.len())?,
                        };
                        data_block.extend_from_slice(&stored);
                        statistics.total_leaves += 1;
                        statistics.max_leaf_sources = statistics.max_leaf_sources.max(points.len() as u64);
                        Node { rect: *rect, kind }
                    }
                };
                packed.encode(&mut bytes);
            }
            statistics.total_nodes += flat.len() as u64;
            debug!(
                "{} tree: {} stars, {} nodes, height {}",
                projection.kind.name(),
                tree.len(),
                flat.len(),
                tree.height()
            );
            node_arrays.push((*projection, bytes));
        }

        let (magnitude_low, magnitude_high) = stars
            .iter()
            .map(|s| s.mag as f64)
            .fold(None, |range: Option<(f64, f64)>, m| {
                Some(range.map_or((m, m), |(lo, hi)| (lo.min(m), hi.max(m))))
            })
            .unwrap_or((0.0, 0.0));

        let mut metadata = self.config.metadata.clone();
        metadata.creation_time.get_or_insert_with(Utc::now);
        let mut header = Header {
            metadata,
            statistics,
            data: DataDescriptor {
                magnitude_low,
                magnitude_high,
                position: 0,
                compression: self.config.compression,
                item_size,
            },
            trees: node_arrays
                .iter()
                .map(|(projection, bytes)| TreeDescriptor {
                    projection: *projection,
                    position: 0,
                    node_count: (bytes.len() / NODE_SIZE) as u32,
                })
                .collect(),
        };

        // File positions depend on the header length, which depends on the
        // printed positions. Iterate until the length is stable.
        let mut xml = header.to_xml();
        let mut converged = false;
        for pass in 0..MAX_LAYOUT_PASSES {
            let mut position = (SIGNATURE_SIZE + xml.len()) as u64;
            for (tree, (_, bytes)) in header.trees.iter_mut().zip(&node_arrays) {
                tree.position = position;
                position += bytes.len() as u64;
            }
            header.data.position = position;
            let next = header.to_xml();
            if next.len() == xml.len() {
                xml = next;
                converged = true;
                debug!("XPSD header layout converged after {} passes", pass + 1);
                break;
            }
            xml = next;
        }
        if !converged {
            return Err(Error::CorruptedData("XPSD header layout did not converge".into()));
        }

        let header_length = u32::try_from(xml.len())
            .map_err(|_| Error::CorruptedData(format!("XML header of {} bytes", xml.len())))?;
        out.write_all(&format::encode_signature(header_length))?;
        out.write_all(xml.as_bytes())?;
        for (_, bytes) in &node_arrays {
            out.write_all(bytes)?;
        }
        out.write_all(&data_block)?;
        Ok(header.statistics)
    }

    /// Project the stars of every tree of the layout.
    fn partition(&self, stars: &[Star]) -> Result<Vec<(TreeProjection, Vec<Projected>)>> {
        let equatorial = TreeProjection::new(TreeProjectionKind::Equirectangular, 0.0, 0.0)?;
        match self.config.trees {
            TreeLayout::Single => Ok(vec![project_all(equatorial, stars.iter())]),
            TreeLayout::PolarCaps { boundary, caps } => {
                if !(boundary > 0.0 && boundary < 90.0) || caps == TreeProjectionKind::Equirectangular {
                    return Err(Error::OutOfRange {
                        what: "polar cap boundary",
                        value: boundary,
                    });
                }
                let north = TreeProjection::new(caps, 0.0, 90.0)?;
                let south = TreeProjection::new(caps, 0.0, -90.0)?;
                Ok(vec![
                    project_all(equatorial, stars.iter().filter(|s| s.dec.abs() < boundary)),
                    project_all(north, stars.iter().filter(|s| s.dec >= boundary)),
                    project_all(south, stars.iter().filter(|s| s.dec <= -boundary)),
                ])
            }
        }
    }
}

fn project_all<'a>(
    projection: TreeProjection,
    stars: impl Iterator<Item = &'a Star>,
) -> (TreeProjection, Vec<Projected>) {
    let items = stars
        .map(|s| Projected {
            star: *s,
            p: projection.project(s.ra, s.dec),
        })
        .collect();
    (projection, items)
}

fn block_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::CorruptedData(format!("leaf block of {len} bytes")))
}
