use anyhow::Result;
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};
use std::path::Path;

use super::{EntityKinds, MemberKind, OsmEntity, OsmNode, OsmRelation, OsmWay, RelationMember};
use crate::utils::build_tag_map;

pub fn for_each_entity<F>(path: &Path, kinds: EntityKinds, mut handler: F) -> Result<()>
where
    F: FnMut(OsmEntity) -> Result<()>,
{
    let reader = BlobReader::from_path(path)?;

    for blob_result in reader {
        let blob = blob_result?;
        let block = match blob.decode() {
            Ok(BlobDecode::OsmHeader(_)) => continue,
            Ok(BlobDecode::OsmData(block)) => block,
            Ok(BlobDecode::Unknown(unknown)) => {
                tracing::info!("Unknown blob: {}", unknown);
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        for element in block.elements() {
            if let Some(entity) = convert_element(element, kinds) {
                handler(entity)?;
            }
        }
    }

    Ok(())
}

fn convert_element(element: Element, kinds: EntityKinds) -> Option<OsmEntity> {
    match element {
        Element::Node(node) if kinds.nodes => Some(OsmEntity::Node(OsmNode {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
        })),
        Element::DenseNode(node) if kinds.nodes => Some(OsmEntity::Node(OsmNode {
            id: node.id(),
            lon: node.lon(),
            lat: node.lat(),
        })),
        Element::Way(way) if kinds.ways => Some(OsmEntity::Way(OsmWay {
            id: way.id(),
            refs: way.refs().collect(),
            tags: build_tag_map(way.tags()),
        })),
        Element::Relation(relation) if kinds.relations => {
            let members = relation
                .members()
                .map(|member| RelationMember {
                    kind: match member.member_type {
                        RelMemberType::Node => MemberKind::Node,
                        RelMemberType::Way => MemberKind::Way,
                        RelMemberType::Relation => MemberKind::Relation,
                    },
                    id: member.member_id,
                    role: member.role().unwrap_or_default().to_string(),
                })
                .collect();
            Some(OsmEntity::Relation(OsmRelation {
                id: relation.id(),
                tags: build_tag_map(relation.tags()),
                members,
            }))
        }
        _ => None,
    }
}
