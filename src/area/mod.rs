//! Area assembly from ways and multipolygon relations.
//!
//! The [`MultipolygonCollector`] learns which ways belong to multipolygon
//! relations during the first pass and builds [`Area`]s while the second
//! pass streams resolved ways.

use geo_types::MultiPolygon;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::osm::OsmWay;
use crate::storage::{Location, LocationIndex};

mod assembler;
mod collector;

pub use assembler::{Assembler, AssemblerConfig};
pub use collector::MultipolygonCollector;

/// Why an area has no usable geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("no member way has two or more node locations")]
    NoUsableWays,
    #[error("ring not closed at ({lon}, {lat})")]
    OpenRing { lon: f64, lat: f64 },
    #[error("ring with only {points} points")]
    RingTooShort { points: usize },
    #[error("invalid geometry: {0}")]
    Invalid(String),
}

/// The object an area was built from, with that object's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Way(i64),
    Relation(i64),
}

impl Provenance {
    pub fn orig_id(&self) -> i64 {
        match self {
            Provenance::Way(id) | Provenance::Relation(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Provenance::Way(_) => "way",
            Provenance::Relation(_) => "relation",
        }
    }

    /// Areas share one id space: twice the object id, plus one for
    /// relations, keeping the sign of the object id.
    pub fn area_id(&self) -> i64 {
        let (id, offset) = match self {
            Provenance::Way(id) => (*id, 0),
            Provenance::Relation(id) => (*id, 1),
        };
        let area_id = id.abs() * 2 + offset;
        if id < 0 { -area_id } else { area_id }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with id={}", self.kind(), self.orig_id())
    }
}

/// An assembled polygon or multipolygon and the tags it carries.
#[derive(Debug, Clone)]
pub struct Area {
    pub id: i64,
    pub provenance: Provenance,
    pub tags: HashMap<String, String>,
    geometry: Result<MultiPolygon<f64>, GeometryError>,
}

impl Area {
    pub fn new(
        provenance: Provenance,
        tags: HashMap<String, String>,
        geometry: Result<MultiPolygon<f64>, GeometryError>,
    ) -> Self {
        Self {
            id: provenance.area_id(),
            provenance,
            tags,
            geometry,
        }
    }

    pub fn into_geometry(self) -> Result<MultiPolygon<f64>, GeometryError> {
        self.geometry
    }
}

/// A way whose node references have been looked up in the location index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWay {
    pub id: i64,
    pub tags: HashMap<String, String>,
    /// Node reference count before resolution
    pub ref_count: usize,
    /// First and last node reference are the same node
    pub closed: bool,
    pub locations: Vec<Location>,
    /// References with no entry in the index
    pub missing_locations: usize,
}

impl ResolvedWay {
    pub fn resolve(way: OsmWay, index: &LocationIndex) -> Self {
        let closed = way.is_closed();
        let locations: Vec<Location> = way.refs.iter().filter_map(|&id| index.get(id)).collect();
        Self {
            id: way.id,
            ref_count: way.refs.len(),
            closed,
            missing_locations: way.refs.len() - locations.len(),
            locations,
            tags: way.tags,
        }
    }

    /// Closed and long enough to enclose an area on its own.
    pub fn is_area_candidate(&self) -> bool {
        self.closed && self.ref_count >= 4
    }
}
