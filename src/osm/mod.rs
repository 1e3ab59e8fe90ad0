//! OSM entity model and readers.
//!
//! Entities are decoded into small owned structs so that the same driver
//! code can run over PBF and XML input. Every reader call streams the whole
//! input once, handing each entity of the requested kinds to a callback.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

mod pbf;
mod xml;

#[derive(Debug, Clone, PartialEq)]
pub struct OsmNode {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OsmWay {
    pub id: i64,
    pub refs: Vec<i64>,
    pub tags: HashMap<String, String>,
}

impl OsmWay {
    /// First and last node reference are the same node.
    pub fn is_closed(&self) -> bool {
        self.refs.len() > 1 && self.refs.first() == self.refs.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMember {
    pub kind: MemberKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OsmRelation {
    pub id: i64,
    pub tags: HashMap<String, String>,
    pub members: Vec<RelationMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OsmEntity {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

/// Which entity kinds a read should decode. Others are skipped cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityKinds {
    pub nodes: bool,
    pub ways: bool,
    pub relations: bool,
}

impl EntityKinds {
    pub const ALL: Self = Self {
        nodes: true,
        ways: true,
        relations: true,
    };

    pub const RELATIONS: Self = Self {
        nodes: false,
        ways: false,
        relations: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pbf,
    Xml,
}

impl InputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            InputFormat::Pbf => "pbf",
            InputFormat::Xml => "xml",
        }
    }
}

/// A re-readable OSM input.
///
/// Standard input is spooled into a temporary file on open, since the
/// two-pass protocol needs to read it twice.
pub struct InputSource {
    path: PathBuf,
    format: InputFormat,
    /// Deleted when the source is dropped
    _spool: Option<NamedTempFile>,
}

impl InputSource {
    pub fn open(input: &Path) -> Result<Self> {
        if input == Path::new("-") {
            return Self::from_stdin();
        }

        let format = detect_format(input)?;
        Ok(Self {
            path: input.to_path_buf(),
            format,
            _spool: None,
        })
    }

    fn from_stdin() -> Result<Self> {
        let mut spool =
            NamedTempFile::new().context("Input: Failed to create spool file for stdin")?;
        let bytes = io::copy(&mut io::stdin().lock(), &mut spool)
            .context("Input: Failed to spool stdin")?;
        tracing::info!("Input: spooled {} bytes from stdin", bytes);

        let path = spool.path().to_path_buf();
        let format = detect_format(&path)?;
        Ok(Self {
            path,
            format,
            _spool: Some(spool),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Stream the whole input once, calling `handler` for every entity of
    /// the requested kinds in file order.
    pub fn for_each_entity<F>(&self, kinds: EntityKinds, handler: F) -> Result<()>
    where
        F: FnMut(OsmEntity) -> Result<()>,
    {
        match self.format {
            InputFormat::Pbf => pbf::for_each_entity(&self.path, kinds, handler),
            InputFormat::Xml => xml::for_each_entity(&self.path, kinds, handler),
        }
    }
}

/// Sniff the first bytes: XML starts with `<` after an optional BOM and
/// whitespace, PBF starts with a big-endian blob header length.
pub fn detect_format(path: &Path) -> Result<InputFormat> {
    let mut file =
        File::open(path).with_context(|| format!("Input: Failed to open {:?}", path))?;
    let mut head = [0u8; 64];
    let mut filled = 0;
    while filled < head.len() {
        let read = file
            .read(&mut head[filled..])
            .with_context(|| format!("Input: Failed to read {:?}", path))?;
        if read == 0 {
            break;
        }
        filled += read;
    }

    Ok(format_from_head(&head[..filled], path))
}

fn format_from_head(head: &[u8], path: &Path) -> InputFormat {
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    match head.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => InputFormat::Xml,
        Some(_) => InputFormat::Pbf,
        // Empty input; let the extension decide which reader reports it
        None => match path.extension().and_then(|ext| ext.to_str()) {
            Some("osm") | Some("xml") => InputFormat::Xml,
            _ => InputFormat::Pbf,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_xml_with_bom_and_whitespace() {
        let head = b"\xEF\xBB\xBF\n  <?xml version=\"1.0\"?><osm>";
        assert_eq!(
            format_from_head(head, Path::new("input.pbf")),
            InputFormat::Xml
        );
    }

    #[test]
    fn detects_pbf_from_blob_header() {
        let head = [0u8, 0, 0, 13, 10, 9, b'O', b'S', b'M', b'H', b'e', b'a', b'd'];
        assert_eq!(
            format_from_head(&head, Path::new("input.osm")),
            InputFormat::Pbf
        );
    }

    #[test]
    fn empty_input_falls_back_to_extension() {
        assert_eq!(format_from_head(b"", Path::new("a.osm")), InputFormat::Xml);
        assert_eq!(format_from_head(b"", Path::new("a.osm.pbf")), InputFormat::Pbf);
    }

    #[test]
    fn closed_way_needs_matching_ends() {
        let mut way = OsmWay {
            id: 1,
            refs: vec![1, 2, 3, 1],
            tags: HashMap::new(),
        };
        assert!(way.is_closed());
        way.refs.pop();
        assert!(!way.is_closed());
        way.refs = vec![1];
        assert!(!way.is_closed());
    }
}
