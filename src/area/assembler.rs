use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::orient::{Direction, Orient};
use geo::{Area, Validation};
use geo_types::{LineString, MultiPolygon, Polygon};
use std::collections::HashMap;

use super::{GeometryError, ResolvedWay};
use crate::storage::Location;

#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerConfig {
    /// Log ring details and role mismatches
    pub debug: bool,
}

/// Builds multipolygons out of resolved way geometry.
///
/// Rings are formed by joining way end points, and whether a ring is an
/// outer or an inner ring follows from how deeply it is nested, not from the
/// member roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler {
    config: AssemblerConfig,
}

/// A closed sequence of locations and the polylines it was joined from.
#[derive(Debug, Clone, PartialEq)]
struct Ring {
    points: Vec<Location>,
    members: Vec<usize>,
}

impl Assembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn assemble_way(&self, way: &ResolvedWay) -> Result<MultiPolygon<f64>, GeometryError> {
        self.assemble(&[("", way)])
    }

    /// `members` are the relation's way members in relation order, each with
    /// its role.
    pub fn assemble_relation(
        &self,
        relation_id: i64,
        members: &[(&str, &ResolvedWay)],
    ) -> Result<MultiPolygon<f64>, GeometryError> {
        if self.config.debug {
            let missing: usize = members.iter().map(|(_, way)| way.missing_locations).sum();
            tracing::debug!(
                "Assembler: relation {} has {} member ways ({} node locations missing)",
                relation_id,
                members.len(),
                missing
            );
        }
        self.assemble(members)
    }

    fn assemble(&self, members: &[(&str, &ResolvedWay)]) -> Result<MultiPolygon<f64>, GeometryError> {
        let mut polylines = Vec::with_capacity(members.len());
        let mut roles = Vec::with_capacity(members.len());
        for (role, way) in members {
            let line = polyline(&way.locations);
            if line.len() < 2 {
                if self.config.debug {
                    tracing::debug!("Assembler: dropping way {} without usable locations", way.id);
                }
                continue;
            }
            polylines.push(line);
            roles.push(*role);
        }
        if polylines.is_empty() {
            return Err(GeometryError::NoUsableWays);
        }

        let rings = join_rings(&polylines)?;
        if let Some(short) = rings.iter().find(|ring| ring.points.len() < 4) {
            return Err(GeometryError::RingTooShort {
                points: short.points.len(),
            });
        }

        let line_strings: Vec<LineString<f64>> = rings
            .iter()
            .map(|ring| ring.points.iter().map(|loc| loc.to_coord()).collect())
            .collect();
        let parents = nest_rings(&line_strings);
        let depths = depths(&parents);

        if self.config.debug {
            log_role_mismatches(&rings, &depths, &roles);
        }

        let multipolygon = build_multipolygon(line_strings, &parents, &depths);
        let errors = multipolygon.validation_errors();
        if let Some(error) = errors.first() {
            return Err(GeometryError::Invalid(error.to_string()));
        }
        Ok(multipolygon)
    }
}

/// Way locations with consecutive duplicates removed.
fn polyline(locations: &[Location]) -> Vec<Location> {
    let mut line = locations.to_vec();
    line.dedup();
    line
}

/// Join polylines end to end, in either direction, until every one is part
/// of a closed ring.
fn join_rings(polylines: &[Vec<Location>]) -> Result<Vec<Ring>, GeometryError> {
    let mut endpoints: HashMap<Location, Vec<usize>> = HashMap::new();
    for (index, line) in polylines.iter().enumerate() {
        endpoints.entry(line[0]).or_default().push(index);
        endpoints.entry(line[line.len() - 1]).or_default().push(index);
    }

    let mut used = vec![false; polylines.len()];
    let mut rings = Vec::new();

    for start in 0..polylines.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut points = polylines[start].clone();
        let mut members = vec![start];

        while points[0] != points[points.len() - 1] {
            let tail = points[points.len() - 1];
            let next = endpoints
                .get(&tail)
                .and_then(|candidates| candidates.iter().copied().find(|&c| !used[c]));
            let Some(next) = next else {
                return Err(GeometryError::OpenRing {
                    lon: tail.lon(),
                    lat: tail.lat(),
                });
            };

            used[next] = true;
            members.push(next);
            let line = &polylines[next];
            if line[0] == tail {
                points.extend_from_slice(&line[1..]);
            } else {
                points.extend(line[..line.len() - 1].iter().rev());
            }
        }

        rings.push(Ring { points, members });
    }

    Ok(rings)
}

/// For each ring, the index of the smallest ring that contains it.
fn nest_rings(rings: &[LineString<f64>]) -> Vec<Option<usize>> {
    let polygons: Vec<Polygon<f64>> = rings
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();
    let areas: Vec<f64> = polygons.iter().map(|p| p.unsigned_area()).collect();

    let mut order: Vec<usize> = (0..rings.len()).collect();
    order.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]));

    let mut parents = vec![None; rings.len()];
    for (position, &ring) in order.iter().enumerate() {
        // Placed rings are larger; scanning back finds the smallest container
        parents[ring] = order[..position]
            .iter()
            .rev()
            .copied()
            .find(|&candidate| ring_inside(&rings[ring], &polygons[candidate]));
    }
    parents
}

/// Decided by the first vertex of `ring` that does not touch the boundary.
fn ring_inside(ring: &LineString<f64>, container: &Polygon<f64>) -> bool {
    for coord in ring.coords() {
        match container.coordinate_position(coord) {
            CoordPos::Inside => return true,
            CoordPos::Outside => return false,
            CoordPos::OnBoundary => continue,
        }
    }
    false
}

fn depths(parents: &[Option<usize>]) -> Vec<usize> {
    (0..parents.len())
        .map(|ring| {
            let mut depth = 0;
            let mut current = parents[ring];
            while let Some(parent) = current {
                depth += 1;
                current = parents[parent];
            }
            depth
        })
        .collect()
}

fn build_multipolygon(
    rings: Vec<LineString<f64>>,
    parents: &[Option<usize>],
    depths: &[usize],
) -> MultiPolygon<f64> {
    let mut interiors: HashMap<usize, Vec<LineString<f64>>> = HashMap::new();
    let mut exteriors = Vec::new();
    for (index, ring) in rings.into_iter().enumerate() {
        match parents[index] {
            Some(parent) if depths[index] % 2 == 1 => {
                interiors.entry(parent).or_default().push(ring);
            }
            _ => exteriors.push((index, ring)),
        }
    }

    let polygons = exteriors
        .into_iter()
        .map(|(index, exterior)| {
            Polygon::new(exterior, interiors.remove(&index).unwrap_or_default())
        })
        .collect::<Vec<_>>();
    MultiPolygon::new(polygons).orient(Direction::Default)
}

fn log_role_mismatches(rings: &[Ring], depths: &[usize], roles: &[&str]) {
    for (index, ring) in rings.iter().enumerate() {
        let expected = if depths[index] % 2 == 0 { "outer" } else { "inner" };
        tracing::debug!(
            "Assembler: ring {} ({} points, {} ways) is {}",
            index,
            ring.points.len(),
            ring.members.len(),
            expected
        );
        for &member in &ring.members {
            let role = roles[member];
            if !role.is_empty() && role != expected {
                tracing::debug!(
                    "Assembler: member {} has role '{}' but lies on an {} ring",
                    member,
                    role,
                    expected
                );
            }
        }
    }
}
