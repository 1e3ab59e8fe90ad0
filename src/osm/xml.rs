use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{EntityKinds, MemberKind, OsmEntity, OsmNode, OsmRelation, OsmWay, RelationMember};

/// The way or relation whose child elements are being read.
enum Open {
    None,
    Way(OsmWay),
    Relation(OsmRelation),
    /// An entity of a kind the caller did not ask for
    Skipped,
}

pub fn for_each_entity<F>(path: &Path, kinds: EntityKinds, mut handler: F) -> Result<()>
where
    F: FnMut(OsmEntity) -> Result<()>,
{
    let file = File::open(path).with_context(|| format!("Input: Failed to open {:?}", path))?;
    let mut parser = Reader::from_reader(BufReader::new(file));
    let mut open = Open::None;
    let mut buf = Vec::new();

    loop {
        let event = parser
            .read_event_into(&mut buf)
            .with_context(|| format!("Input: Failed to parse {:?}", path))?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                if let Some(entity) = start_element(&start, kinds, &mut open, true)? {
                    handler(entity)?;
                }
            }
            Event::Empty(start) => {
                if let Some(entity) = start_element(&start, kinds, &mut open, false)? {
                    handler(entity)?;
                }
            }
            Event::End(end) => {
                if matches!(end.local_name().as_ref(), b"way" | b"relation")
                    && let Some(entity) = close(&mut open)
                {
                    handler(entity)?;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Handle an opening or self-closing tag. Returns an entity once it is
/// complete: nodes immediately, ways and relations here only when they have
/// no children.
fn start_element(
    start: &BytesStart,
    kinds: EntityKinds,
    open: &mut Open,
    has_children: bool,
) -> Result<Option<OsmEntity>> {
    match start.local_name().as_ref() {
        b"node" => {
            if !kinds.nodes {
                return Ok(None);
            }
            let id = required_attr(start, b"id")?;
            // Deleted nodes in editor exports carry no coordinates
            let lat = optional_attr(start, b"lat")?;
            let lon = optional_attr(start, b"lon")?;
            let (Some(lat), Some(lon)) = (lat, lon) else {
                tracing::debug!("Skipping node {} without a location", id);
                return Ok(None);
            };
            Ok(Some(OsmEntity::Node(OsmNode { id, lat, lon })))
        }
        b"way" => {
            *open = if kinds.ways {
                Open::Way(OsmWay {
                    id: required_attr(start, b"id")?,
                    ..Default::default()
                })
            } else {
                Open::Skipped
            };
            Ok(if has_children { None } else { close(open) })
        }
        b"relation" => {
            *open = if kinds.relations {
                Open::Relation(OsmRelation {
                    id: required_attr(start, b"id")?,
                    ..Default::default()
                })
            } else {
                Open::Skipped
            };
            Ok(if has_children { None } else { close(open) })
        }
        b"nd" => {
            if let Open::Way(way) = open {
                way.refs.push(required_attr(start, b"ref")?);
            }
            Ok(None)
        }
        b"tag" => {
            let tags = match open {
                Open::Way(way) => &mut way.tags,
                Open::Relation(relation) => &mut relation.tags,
                _ => return Ok(None),
            };
            let key: String = required_attr(start, b"k")?;
            let value: String = required_attr(start, b"v")?;
            tags.insert(key, value);
            Ok(None)
        }
        b"member" => {
            if let Open::Relation(relation) = open {
                let kind = match attr(start, b"type")?.as_deref() {
                    Some("node") => MemberKind::Node,
                    Some("way") => MemberKind::Way,
                    Some("relation") => MemberKind::Relation,
                    other => return Err(anyhow!("Input: Unknown member type {:?}", other)),
                };
                relation.members.push(RelationMember {
                    kind,
                    id: required_attr(start, b"ref")?,
                    role: attr(start, b"role")?.unwrap_or_default(),
                });
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn close(open: &mut Open) -> Option<OsmEntity> {
    match std::mem::replace(open, Open::None) {
        Open::Way(way) => Some(OsmEntity::Way(way)),
        Open::Relation(relation) => Some(OsmEntity::Relation(relation)),
        Open::None | Open::Skipped => None,
    }
}

fn attr(start: &BytesStart, name: &[u8]) -> Result<Option<String>> {
    for attribute in start.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr<T>(start: &BytesStart, name: &[u8]) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional_attr(start, name)?.ok_or_else(|| {
        anyhow!(
            "Input: <{}> is missing attribute '{}'",
            String::from_utf8_lossy(start.local_name().as_ref()),
            String::from_utf8_lossy(name)
        )
    })
}

fn optional_attr<T>(start: &BytesStart, name: &[u8]) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = attr(start, name)? else {
        return Ok(None);
    };
    let value = raw.parse::<T>().with_context(|| {
        format!(
            "Input: Bad '{}' value {:?} on <{}>",
            String::from_utf8_lossy(name),
            raw,
            String::from_utf8_lossy(start.local_name().as_ref())
        )
    })?;
    Ok(Some(value))
}
