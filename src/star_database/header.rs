//! The XML header of an XPSD file.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::Node as XmlNode;

use crate::error::{Error, Result};

use super::format::Compression;
use super::projection::{TreeProjection, TreeProjectionKind};

/// Descriptive metadata of a database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub identifier: Option<String>,
    pub version: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Option<String>,
    pub copyright: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
}

/// Summary counts written by the database generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_sources: u64,
    pub total_nodes: u64,
    pub total_leaves: u64,
    pub max_leaf_sources: u64,
}

/// The data block holding every leaf block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataDescriptor {
    pub magnitude_low: f64,
    pub magnitude_high: f64,
    /// Absolute file position of the data block.
    pub position: u64,
    pub compression: Option<Compression>,
    /// Size of an encoded source record.
    pub item_size: usize,
}

/// One spatial index tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeDescriptor {
    pub projection: TreeProjection,
    /// Absolute file position of the packed node array.
    pub position: u64,
    pub node_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub metadata: Metadata,
    pub statistics: Statistics,
    pub data: DataDescriptor,
    pub trees: Vec<TreeDescriptor>,
}

impl Header {
    pub fn parse(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text).map_err(|e| Error::Parse(format!("XPSD header: {e}")))?;
        let root = doc.root_element();
        if root.tag_name().name() != "xpsd" {
            return Err(Error::Parse(format!(
                "unexpected XPSD root element <{}>",
                root.tag_name().name()
            )));
        }
        match root.attribute("version") {
            Some("1.0") => {}
            v => return Err(Error::Parse(format!("unsupported XPSD header version {v:?}"))),
        }

        let mut metadata = Metadata::default();
        let mut statistics = Statistics::default();
        let mut data = None;
        let mut trees = Vec::new();
        for element in root.children().filter(XmlNode::is_element) {
            match element.tag_name().name() {
                "Metadata" => metadata = parse_metadata(element)?,
                "Statistics" => statistics = parse_statistics(element)?,
                "Data" => {
                    if data.is_some() {
                        return Err(Error::Parse("duplicate <Data> element".into()));
                    }
                    data = Some(parse_data(element)?);
                }
                "Tree" => trees.push(parse_tree(element)?),
                _ => {}
            }
        }
        let data = data.ok_or_else(|| Error::Parse("missing <Data> element".into()))?;
        if trees.is_empty() {
            return Err(Error::Parse("missing <Tree> element".into()));
        }
        Ok(Self {
            metadata,
            statistics,
            data,
            trees,
        })
    }

    pub fn to_xml(&self) -> String {
        let mut x = String::new();
        x.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xpsd version=\"1.0\">\n");

        let m = &self.metadata;
        x.push_str("<Metadata>\n");
        let fields = [
            ("Identifier", &m.identifier),
            ("Version", &m.version),
            ("Title", &m.title),
            ("Description", &m.description),
            ("Authors", &m.authors),
            ("Copyright", &m.copyright),
        ];
        for (tag, value) in fields {
            if let Some(v) = value {
                let _ = writeln!(x, "<{tag}>{}</{tag}>", escape(v));
            }
        }
        if let Some(t) = m.creation_time {
            let _ = writeln!(
                x,
                "<CreationTime>{}</CreationTime>",
                t.to_rfc3339_opts(SecondsFormat::Millis, true)
            );
        }
        x.push_str("</Metadata>\n");

        let s = &self.statistics;
        let _ = writeln!(
            x,
            "<Statistics totalSources=\"{}\" totalNodes=\"{}\" totalLeaves=\"{}\" maxLeafSources=\"{}\"/>",
            s.total_sources, s.total_nodes, s.total_leaves, s.max_leaf_sources
        );

        let d = &self.data;
        let compression = d
            .compression
            .map(|c| format!(" compression=\"{}\"", c.name()))
            .unwrap_or_default();
        let _ = writeln!(
            x,
            "<Data magnitudeLow=\"{}\" magnitudeHigh=\"{}\" position=\"{}\"{compression} itemSize=\"{}\"/>",
            d.magnitude_low, d.magnitude_high, d.position, d.item_size
        );

        for t in &self.trees {
            let _ = writeln!(
                x,
                "<Tree projection=\"{}\" centerRA=\"{}\" centerDec=\"{}\" position=\"{}\" nodeCount=\"{}\"/>",
                t.projection.kind.name(),
                t.projection.ra0,
                t.projection.dec0,
                t.position,
                t.node_count
            );
        }
        x.push_str("</xpsd>\n");
        x
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// ── Element parsers ─────────────────────────────────────────────────────────

fn attribute<T: std::str::FromStr>(element: XmlNode<'_, '_>, name: &str) -> Result<T> {
    let tag = element.tag_name().name();
    let value = element
        .attribute(name)
        .ok_or_else(|| Error::Parse(format!("<{tag}>: missing {name} attribute")))?;
    value
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("<{tag}>: invalid {name} attribute '{value}'")))
}

fn optional_attribute<T: std::str::FromStr>(element: XmlNode<'_, '_>, name: &str) -> Result<Option<T>> {
    if element.has_attribute(name) {
        attribute(element, name).map(Some)
    } else {
        Ok(None)
    }
}

fn parse_metadata(element: XmlNode<'_, '_>) -> Result<Metadata> {
    let mut m = Metadata::default();
    for child in element.children().filter(XmlNode::is_element) {
        let text = child.text().map(|t| t.trim().to_string());
        match child.tag_name().name() {
            "Identifier" => m.identifier = text,
            "Version" => m.version = text,
            "Title" => m.title = text,
            "Description" => m.description = text,
            "Authors" => m.authors = text,
            "Copyright" => m.copyright = text,
            "CreationTime" => {
                let t = text.unwrap_or_default();
                let time = DateTime::parse_from_rfc3339(&t)
                    .map_err(|e| Error::Parse(format!("<CreationTime>: '{t}': {e}")))?;
                m.creation_time = Some(time.with_timezone(&Utc));
            }
            _ => {}
        }
    }
    Ok(m)
}

fn parse_statistics(element: XmlNode<'_, '_>) -> Result<Statistics> {
    Ok(Statistics {
        total_sources: optional_attribute(element, "totalSources")?.unwrap_or(0),
        total_nodes: optional_attribute(element, "totalNodes")?.unwrap_or(0),
        total_leaves: optional_attribute(element, "totalLeaves")?.unwrap_or(0),
        max_leaf_sources: optional_attribute(element, "maxLeafSources")?.unwrap_or(0),
    })
}

fn parse_data(element: XmlNode<'_, '_>) -> Result<DataDescriptor> {
    let magnitude_low: f64 = attribute(element, "magnitudeLow")?;
    let magnitude_high: f64 = attribute(element, "magnitudeHigh")?;
    if !(magnitude_low <= magnitude_high) {
        return Err(Error::Parse(format!(
            "<Data>: empty magnitude range [{magnitude_low}, {magnitude_high}]"
        )));
    }
    let compression = element.attribute("compression").map(Compression::parse).transpose()?;
    let item_size: usize = attribute(element, "itemSize")?;
    if item_size == 0 {
        return Err(Error::Parse("<Data>: zero itemSize".into()));
    }
    Ok(DataDescriptor {
        magnitude_low,
        magnitude_high,
        position: attribute(element, "position")?,
        compression,
        item_size,
    })
}

fn parse_tree(element: XmlNode<'_, '_>) -> Result<TreeDescriptor> {
    let kind = TreeProjectionKind::parse(element.attribute("projection").unwrap_or_default())?;
    let projection = TreeProjection::new(
        kind,
        attribute(element, "centerRA")?,
        attribute(element, "centerDec")?,
    )?;
    Ok(TreeDescriptor {
        projection,
        position: attribute(element, "position")?,
        node_count: attribute(element, "nodeCount")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header() -> Header {
        Header {
            metadata: Metadata {
                title: Some("Test <catalog> & friends".into()),
                creation_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single(),
                ..Metadata::default()
            },
            statistics: Statistics {
                total_sources: 400,
                total_nodes: 5,
                total_leaves: 4,
                max_leaf_sources: 101,
            },
            data: DataDescriptor {
                magnitude_low: 0.0,
                magnitude_high: 18.0,
                position: 1024,
                compression: Compression::parse("lz4+sh").ok(),
                item_size: 32,
            },
            trees: vec![TreeDescriptor {
                projection: TreeProjection::new(TreeProjectionKind::Equirectangular, 0.0, 0.0).unwrap(),
                position: 800,
                node_count: 5,
            }],
        }
    }

    #[test]
    fn xml_round_trip() {
        let h = header();
        assert_eq!(Header::parse(&h.to_xml()).unwrap(), h);
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(matches!(Header::parse("<xpsd version=\"2.0\"/>"), Err(Error::Parse(_))));
        assert!(Header::parse("<xpsd version=\"1.0\"></xpsd>").is_err());
        let no_tree = "<xpsd version=\"1.0\"><Data magnitudeLow=\"0\" magnitudeHigh=\"1\" position=\"9\" itemSize=\"32\"/></xpsd>";
        assert!(Header::parse(no_tree).is_err());
        let bad_codec = header().to_xml().replace("lz4+sh", "brotli");
        assert!(matches!(Header::parse(&bad_codec), Err(Error::UnsupportedCompression(_))));
        let bad_center = header().to_xml().replace("centerDec=\"0\"", "centerDec=\"30\"");
        assert!(matches!(Header::parse(&bad_center), Err(Error::CorruptedData(_))));
    }
}
