use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `natural` values that exist on top of ice and so never mark bare ground.
pub const DEFAULT_EXCLUDED_NATURAL: &[&str] = &[
    "cliff",
    "sinkhole",
    "cave_entrance",
    "crevasse",
    "dune",
    "desert",
    "valley",
    "volcano",
];

/// `natural` values accepted when running with the inclusion policy.
pub const DEFAULT_INCLUDED_NATURAL: &[&str] = &["bare_rock", "scree", "glacier", "water"];

pub const DEFAULT_NODE_CACHE_MAX_NODES: u64 = 16_000_000_000;

/// Settings that can come from a YAML file passed with `--config`.
///
/// Everything is optional; command line flags win over the file.
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct NoiceConfig {
    #[serde(default)]
    pub policy: Option<PolicyKind>,
    /// Replaces the default value list of the active policy.
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub node_cache_mode: Option<NodeCacheMode>,
    #[serde(default)]
    pub node_cache_max_nodes: Option<u64>,
}

impl NoiceConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .with_context(|| format!("Config: Failed to read {:?}", path))?;
        settings
            .try_deserialize()
            .with_context(|| format!("Config: Invalid settings in {:?}", path))
    }
}

/// Which revision of the tag predicate decides acceptance.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Accept only listed `natural` values
    Inclusion,
    /// Accept any `natural` value except the listed ones
    #[default]
    Exclusion,
}

impl PolicyKind {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyKind::Inclusion => "inclusion",
            PolicyKind::Exclusion => "exclusion",
        }
    }

    pub fn default_values(&self) -> Vec<String> {
        let values = match self {
            PolicyKind::Inclusion => DEFAULT_INCLUDED_NATURAL,
            PolicyKind::Exclusion => DEFAULT_EXCLUDED_NATURAL,
        };
        values.iter().map(|v| v.to_string()).collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeCacheMode {
    /// Sorted in-memory array
    #[default]
    Sparse,
    /// In-memory hash map
    Memory,
    /// Memory-mapped temporary file indexed by node id
    #[value(alias = "mmap")]
    Dense,
}

impl NodeCacheMode {
    pub fn label(&self) -> &'static str {
        match self {
            NodeCacheMode::Sparse => "sparse",
            NodeCacheMode::Memory => "memory",
            NodeCacheMode::Dense => "dense",
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub policy: PolicyKind,
    pub values: Vec<String>,
    pub node_cache_mode: NodeCacheMode,
    pub node_cache_max_nodes: u64,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            values: PolicyKind::default().default_values(),
            node_cache_mode: NodeCacheMode::default(),
            node_cache_max_nodes: DEFAULT_NODE_CACHE_MAX_NODES,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Layer command line overrides on top of the file settings.
    pub fn resolve(
        file: NoiceConfig,
        policy: Option<PolicyKind>,
        node_cache_mode: Option<NodeCacheMode>,
        node_cache_max_nodes: Option<u64>,
        debug: bool,
    ) -> Self {
        let file_policy = file.policy.unwrap_or_default();
        let policy = policy.unwrap_or(file_policy);
        // A value list in the file belongs to the file's policy (the default
        // one when unnamed); switching policy on the command line falls
        // back to the other policy's defaults.
        let values = match file.values {
            Some(values) if file_policy == policy => values,
            _ => policy.default_values(),
        };

        Self {
            policy,
            values,
            node_cache_mode: node_cache_mode
                .or(file.node_cache_mode)
                .unwrap_or_default(),
            node_cache_max_nodes: node_cache_max_nodes
                .or(file.node_cache_max_nodes)
                .unwrap_or(DEFAULT_NODE_CACHE_MAX_NODES),
            debug,
        }
    }
}
