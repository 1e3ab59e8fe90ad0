//! Tag predicate and the area handler that writes accepted features.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};

use crate::area::Area;
use crate::config::{PolicyKind, RuntimeConfig};
use crate::sinks::{DataSink, FeatureRecord, TYPE_FIELD_WIDTH};
use crate::utils::truncate_to_char_boundary;

pub const NATURAL_KEY: &str = "natural";
pub const SUPRAGLACIAL_KEY: &str = "supraglacial";
pub const GLACIER_LABEL: &str = "glacier";

/// Decides whether an area's tags describe ground that is not icesheet.
#[derive(Debug, Clone)]
pub struct TagPredicate {
    policy: PolicyKind,
    values: HashSet<String>,
}

impl TagPredicate {
    pub fn new<I, S>(policy: PolicyKind, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policy,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self::new(runtime.policy, runtime.values.iter().cloned())
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    /// The label to record when the tags are accepted.
    pub fn classify<'a>(&self, tags: &'a HashMap<String, String>) -> Option<&'a str> {
        let natural = tags.get(NATURAL_KEY)?.as_str();
        let supraglacial = tags.get(SUPRAGLACIAL_KEY).is_some_and(|v| v == "yes");

        let accepted = match self.policy {
            PolicyKind::Inclusion => {
                self.values.contains(natural) && !(natural == "water" && supraglacial)
            }
            PolicyKind::Exclusion => !self.values.contains(natural) && !supraglacial,
        };
        accepted.then_some(natural)
    }
}

/// Accepted feature counts, split on the `glacier` label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureTally {
    pub glacier: u64,
    pub noice: u64,
}

impl FeatureTally {
    pub fn record(&mut self, label: &str) {
        if label == GLACIER_LABEL {
            self.glacier += 1;
        } else {
            self.noice += 1;
        }
    }

    pub fn accepted(&self) -> u64 {
        self.glacier + self.noice
    }
}

/// Receives every assembled area, keeps the ones the predicate accepts and
/// writes them to the sink.
pub struct NoiceWriter<'s> {
    predicate: TagPredicate,
    sink: &'s mut dyn DataSink,
    tally: FeatureTally,
    rejected: u64,
    skipped_geometries: u64,
}

impl<'s> NoiceWriter<'s> {
    pub fn new(predicate: TagPredicate, sink: &'s mut dyn DataSink) -> Self {
        Self {
            predicate,
            sink,
            tally: FeatureTally::default(),
            rejected: 0,
            skipped_geometries: 0,
        }
    }

    /// Geometry errors skip the area; only a failed sink write is an error.
    pub fn handle_area(&mut self, area: Area) -> Result<()> {
        let Some(label) = self.predicate.classify(&area.tags) else {
            self.rejected += 1;
            return Ok(());
        };
        let label = truncate_to_char_boundary(label, TYPE_FIELD_WIDTH).to_string();
        let id = area.id;
        let provenance = area.provenance;

        let geometry = match area.into_geometry() {
            Ok(geometry) => geometry,
            Err(error) => {
                tracing::warn!(
                    "Ignoring illegal geometry for area {} created from {}: {}",
                    id,
                    provenance,
                    error
                );
                self.skipped_geometries += 1;
                return Ok(());
            }
        };

        self.tally.record(&label);
        self.sink
            .add_feature(FeatureRecord {
                id,
                label,
                geometry,
            })
            .with_context(|| format!("Sink: Failed to write area {} ({})", id, provenance))
    }

    pub fn tally(&self) -> FeatureTally {
        self.tally
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn skipped_geometries(&self) -> u64 {
        self.skipped_geometries
    }
}
