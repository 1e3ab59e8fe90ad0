use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::{Area, Assembler, AssemblerConfig, Provenance, ResolvedWay};
use crate::osm::{MemberKind, OsmRelation};

/// Relation `type` values whose members describe an area.
const AREA_RELATION_TYPES: &[&str] = &["multipolygon", "boundary"];

/// Keys left out when comparing an inner way's tags with its relation's.
const UNINTERESTING_KEYS: &[&str] = &["type", "created_by", "source", "note"];

/// A multipolygon relation waiting for its member ways.
struct PendingRelation {
    id: i64,
    tags: HashMap<String, String>,
    /// Way members in relation order, one entry per distinct way
    members: Vec<(i64, String)>,
    ways: HashMap<i64, Rc<ResolvedWay>>,
    done: bool,
}

impl PendingRelation {
    fn missing(&self) -> usize {
        self.members.len() - self.ways.len()
    }
}

/// Tracks multipolygon relations across both passes and turns completed
/// relations and closed ways into areas.
pub struct MultipolygonCollector {
    assembler: Assembler,
    relations: Vec<PendingRelation>,
    /// Way id to the relations (indexes into `relations`) it is a member of
    member_of: HashMap<i64, Vec<usize>>,
    /// Inner ways already emitted as areas of their own
    inner_way_areas: HashSet<i64>,
    way_areas: u64,
    relation_areas: u64,
}

impl MultipolygonCollector {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            assembler: Assembler::new(config),
            relations: Vec::new(),
            member_of: HashMap::new(),
            inner_way_areas: HashSet::new(),
            way_areas: 0,
            relation_areas: 0,
        }
    }

    /// First pass: remember the relation if it describes an area.
    /// Returns whether it was kept.
    pub fn add_relation(&mut self, relation: OsmRelation) -> bool {
        let is_area = relation
            .tags
            .get("type")
            .is_some_and(|kind| AREA_RELATION_TYPES.contains(&kind.as_str()));
        if !is_area {
            return false;
        }

        let mut seen = HashSet::new();
        let members: Vec<(i64, String)> = relation
            .members
            .into_iter()
            .filter(|member| member.kind == MemberKind::Way && seen.insert(member.id))
            .map(|member| (member.id, member.role))
            .collect();
        if members.is_empty() {
            return false;
        }

        let slot = self.relations.len();
        for (way_id, _) in &members {
            self.member_of.entry(*way_id).or_default().push(slot);
        }
        self.relations.push(PendingRelation {
            id: relation.id,
            tags: relation.tags,
            members,
            ways: HashMap::new(),
            done: false,
        });
        true
    }

    /// Second pass: take a resolved way and emit every area it completes.
    pub fn handle_way<F>(&mut self, way: ResolvedWay, on_area: &mut F) -> Result<()>
    where
        F: FnMut(Area) -> Result<()>,
    {
        let Some(slots) = self.member_of.remove(&way.id) else {
            if way.is_area_candidate() {
                let geometry = self.assembler.assemble_way(&way);
                self.way_areas += 1;
                on_area(Area::new(Provenance::Way(way.id), way.tags, geometry))?;
            }
            return Ok(());
        };

        let way = Rc::new(way);
        for slot in slots {
            let relation = &mut self.relations[slot];
            if relation.done {
                continue;
            }
            relation.ways.insert(way.id, Rc::clone(&way));
            if relation.missing() == 0 {
                for area in self.complete_relation(slot) {
                    on_area(area)?;
                }
            }
        }
        Ok(())
    }

    /// Builds the relation area, followed by a way area for every closed
    /// inner way that carries tags of its own.
    fn complete_relation(&mut self, slot: usize) -> Vec<Area> {
        let relation = &mut self.relations[slot];
        relation.done = true;
        let ways = std::mem::take(&mut relation.ways);
        let members = std::mem::take(&mut relation.members);
        let mut tags = std::mem::take(&mut relation.tags);
        tags.remove("type");
        let relation_id = relation.id;

        let member_ways: Vec<(&str, &ResolvedWay)> = members
            .iter()
            .filter_map(|(way_id, role)| ways.get(way_id).map(|way| (role.as_str(), way.as_ref())))
            .collect();
        let geometry = self.assembler.assemble_relation(relation_id, &member_ways);
        self.relation_areas += 1;

        let inner_areas: Vec<Area> = if geometry.is_ok() {
            member_ways
                .iter()
                .filter(|(role, way)| {
                    *role == "inner"
                        && way.is_area_candidate()
                        && tags_differ(&way.tags, &tags)
                        && self.inner_way_areas.insert(way.id)
                })
                .map(|(_, way)| {
                    Area::new(
                        Provenance::Way(way.id),
                        way.tags.clone(),
                        self.assembler.assemble_way(way),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        self.way_areas += inner_areas.len() as u64;

        let mut areas = Vec::with_capacity(inner_areas.len() + 1);
        areas.push(Area::new(Provenance::Relation(relation_id), tags, geometry));
        areas.extend(inner_areas);
        areas
    }

    /// Relations that never saw all of their member ways, in input order.
    pub fn incomplete_relations(&self) -> Vec<i64> {
        self.relations
            .iter()
            .filter(|relation| !relation.done)
            .map(|relation| relation.id)
            .collect()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn way_areas(&self) -> u64 {
        self.way_areas
    }

    pub fn relation_areas(&self) -> u64 {
        self.relation_areas
    }
}

/// True when `way_tags` has interesting tags that are not exactly the
/// relation's interesting tags.
fn tags_differ(
    way_tags: &HashMap<String, String>,
    relation_tags: &HashMap<String, String>,
) -> bool {
    let interesting = |tags: &HashMap<String, String>| -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = tags
            .iter()
            .filter(|(key, _)| !UNINTERESTING_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        pairs.sort();
        pairs
    };
    let own = interesting(way_tags);
    !own.is_empty() && own != interesting(relation_tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::RelationMember;
    use crate::storage::Location;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn member(id: i64, role: &str) -> RelationMember {
        RelationMember {
            kind: MemberKind::Way,
            id,
            role: role.to_string(),
        }
    }

    fn relation(id: i64, kind: &str, members: Vec<RelationMember>) -> OsmRelation {
        OsmRelation {
            id,
            tags: tags(&[("type", kind), ("natural", "glacier")]),
            members,
        }
    }

    fn way(id: i64, points: &[(f64, f64)], way_tags: &[(&str, &str)]) -> ResolvedWay {
        let locations: Vec<Location> = points
            .iter()
            .map(|&(x, y)| Location::from_degrees(x, y))
            .collect();
        ResolvedWay {
            id,
            tags: tags(way_tags),
            ref_count: locations.len(),
            closed: locations.first() == locations.last(),
            locations,
            missing_locations: 0,
        }
    }

    fn collect(collector: &mut MultipolygonCollector, ways: Vec<ResolvedWay>) -> Vec<Area> {
        let mut areas = Vec::new();
        let mut on_area = |area: Area| -> Result<()> {
            areas.push(area);
            Ok(())
        };
        for way in ways {
            collector.handle_way(way, &mut on_area).unwrap();
        }
        areas
    }

    #[test]
    fn keeps_only_area_relations_with_way_members() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());

        assert!(collector.add_relation(relation(1, "multipolygon", vec![member(10, "outer")])));
        assert!(collector.add_relation(relation(2, "boundary", vec![member(11, "outer")])));
        assert!(!collector.add_relation(relation(3, "route", vec![member(12, "")])));
        let node_only = RelationMember {
            kind: MemberKind::Node,
            id: 5,
            role: "label".to_string(),
        };
        assert!(!collector.add_relation(relation(4, "multipolygon", vec![node_only])));

        assert_eq!(collector.relation_count(), 2);
    }

    #[test]
    fn emits_relation_area_when_last_member_arrives() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(
            7,
            "multipolygon",
            vec![member(1, "outer"), member(2, "outer")],
        ));

        let first = way(1, &[(0.0, -70.0), (1.0, -70.0), (1.0, -71.0)], &[]);
        let areas = collect(&mut collector, vec![first]);
        assert!(areas.is_empty());

        let second = way(2, &[(1.0, -71.0), (0.0, -71.0), (0.0, -70.0)], &[]);
        let areas = collect(&mut collector, vec![second]);
        assert_eq!(areas.len(), 1);

        let area = &areas[0];
        assert_eq!(area.id, 15);
        assert_eq!(area.provenance, Provenance::Relation(7));
        assert_eq!(area.tags.get("natural").map(String::as_str), Some("glacier"));
        assert_eq!(area.tags.get("type"), None);
        assert!(area.clone().into_geometry().is_ok());
        assert!(collector.incomplete_relations().is_empty());
        assert_eq!(collector.relation_areas(), 1);
    }

    #[test]
    fn member_ways_do_not_become_way_areas() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(
            7,
            "multipolygon",
            vec![member(1, "outer"), member(9, "outer")],
        ));

        let closed = way(
            1,
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)],
            &[("natural", "scree")],
        );
        let areas = collect(&mut collector, vec![closed]);

        assert!(areas.is_empty());
        assert_eq!(collector.incomplete_relations(), vec![7]);
    }

    #[test]
    fn closed_way_outside_relations_becomes_way_area() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        let closed = way(
            4,
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)],
            &[("natural", "bare_rock")],
        );
        let open = way(5, &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], &[("natural", "cliff")]);

        let areas = collect(&mut collector, vec![closed, open]);

        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].id, 8);
        assert_eq!(areas[0].provenance, Provenance::Way(4));
        assert_eq!(areas[0].tags.get("natural").map(String::as_str), Some("bare_rock"));
        assert_eq!(collector.way_areas(), 1);
    }

    #[test]
    fn shared_way_completes_two_relations() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(1, "multipolygon", vec![member(10, "outer")]));
        collector.add_relation(relation(2, "multipolygon", vec![member(10, "outer")]));

        let square = way(
            10,
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            &[],
        );
        let areas = collect(&mut collector, vec![square]);

        let ids: Vec<i64> = areas.iter().map(|area| area.provenance.orig_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn repeated_member_counts_once() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(
            3,
            "multipolygon",
            vec![member(10, "outer"), member(10, "outer")],
        ));

        let square = way(
            10,
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            &[],
        );
        let areas = collect(&mut collector, vec![square]);

        assert_eq!(areas.len(), 1);
        assert!(areas[0].clone().into_geometry().is_ok());
    }

    #[test]
    fn broken_relation_still_yields_area_with_error() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(3, "multipolygon", vec![member(10, "outer")]));

        let open = way(10, &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], &[]);
        let areas = collect(&mut collector, vec![open]);

        assert_eq!(areas.len(), 1);
        assert!(areas[0].clone().into_geometry().is_err());
    }

    #[test]
    fn tagged_inner_way_also_becomes_way_area() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(
            20,
            "multipolygon",
            vec![member(10, "outer"), member(13, "inner"), member(14, "inner")],
        ));

        let outer = way(
            10,
            &[(0.0, -70.0), (4.0, -70.0), (4.0, -74.0), (0.0, -74.0), (0.0, -70.0)],
            &[],
        );
        let nunatak = way(
            13,
            &[(1.0, -71.0), (2.0, -71.0), (2.0, -72.0), (1.0, -72.0), (1.0, -71.0)],
            &[("natural", "bare_rock"), ("source", "survey")],
        );
        let plain_hole = way(
            14,
            &[(3.0, -72.5), (3.5, -72.5), (3.5, -73.0), (3.0, -73.0), (3.0, -72.5)],
            &[("natural", "glacier"), ("source", "survey")],
        );
        let areas = collect(&mut collector, vec![outer, nunatak, plain_hole]);

        let summary: Vec<(Provenance, Option<&str>)> = areas
            .iter()
            .map(|area| (area.provenance, area.tags.get("natural").map(String::as_str)))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Provenance::Relation(20), Some("glacier")),
                (Provenance::Way(13), Some("bare_rock")),
            ]
        );
        assert_eq!(areas[1].id, 26);
        assert!(areas[1].clone().into_geometry().is_ok());
        assert_eq!(collector.way_areas(), 1);
        assert_eq!(collector.relation_areas(), 1);
    }

    #[test]
    fn untagged_or_outer_member_ways_stay_inside_relation() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        collector.add_relation(relation(
            5,
            "multipolygon",
            vec![member(1, "outer"), member(2, "inner")],
        ));

        let outer = way(
            1,
            &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
            &[("natural", "scree")],
        );
        let hole = way(
            2,
            &[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0), (1.0, 1.0)],
            &[("created_by", "JOSM")],
        );
        let areas = collect(&mut collector, vec![outer, hole]);

        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].provenance, Provenance::Relation(5));
    }

    #[test]
    fn callback_errors_propagate() {
        let mut collector = MultipolygonCollector::new(AssemblerConfig::default());
        let closed = way(4, &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)], &[]);

        let mut failing = |_: Area| -> Result<()> { Err(anyhow::anyhow!("write failed")) };
        assert!(collector.handle_way(closed, &mut failing).is_err());
    }
}
