use anyhow::{Context, Result, anyhow};
use geo_types::Coord;
use memmap2::MmapMut;
use std::collections::HashMap;
use tempfile::NamedTempFile;

use crate::config::NodeCacheMode;

// 8 bytes per node: 4 bytes x (i32), 4 bytes y (i32)
// Stored as fixed precision integers (deg * 10^7)
const NODE_SIZE: usize = 8;
const SCALE_FACTOR: f64 = 10_000_000.0;

/// A node position in fixed precision, the same resolution OSM stores.
///
/// Ring assembly compares locations for equality, so they are kept as
/// integers rather than floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    x: i32,
    y: i32,
}

impl Location {
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            x: (lon * SCALE_FACTOR).round() as i32,
            y: (lat * SCALE_FACTOR).round() as i32,
        }
    }

    pub fn lon(&self) -> f64 {
        self.x as f64 / SCALE_FACTOR
    }

    pub fn lat(&self) -> f64 {
        self.y as f64 / SCALE_FACTOR
    }

    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon(),
            y: self.lat(),
        }
    }
}

/// Node id to location lookup filled while the second pass streams nodes.
pub struct LocationIndex {
    inner: LocationIndexImpl,
}

enum LocationIndexImpl {
    Sparse(SparseLocationIndex),
    Memory(MemoryLocationIndex),
    Dense(DenseLocationIndex),
}

struct SparseLocationIndex {
    entries: Vec<(u64, Location)>,
    sorted: bool,
}

struct MemoryLocationIndex {
    nodes: HashMap<u64, Location>,
}

struct DenseLocationIndex {
    mmap: MmapMut,
    max_nodes: u64,
    /// Deleted when the index is dropped
    _temp_file: NamedTempFile,
}

impl LocationIndex {
    pub fn new(mode: NodeCacheMode, max_nodes: u64) -> Result<Self> {
        match mode {
            NodeCacheMode::Sparse => Ok(Self::new_sparse()),
            NodeCacheMode::Memory => Ok(Self::new_memory()),
            NodeCacheMode::Dense => Self::new_dense_temp(max_nodes),
        }
    }

    /// Sorted array of (id, location) pairs; compact for extracts.
    pub fn new_sparse() -> Self {
        Self {
            inner: LocationIndexImpl::Sparse(SparseLocationIndex {
                entries: Vec::new(),
                sorted: true,
            }),
        }
    }

    pub fn new_memory() -> Self {
        Self {
            inner: LocationIndexImpl::Memory(MemoryLocationIndex {
                nodes: HashMap::new(),
            }),
        }
    }

    /// Create a dense index backed by a temporary memory-mapped file.
    /// The file is automatically deleted when the index is dropped.
    pub fn new_dense_temp(max_nodes: u64) -> Result<Self> {
        let temp_file = NamedTempFile::new()
            .context("NodeStore: Failed to create temporary dense cache file")?;

        // Set file length to max size (relying on sparse files)
        let file_size = max_nodes
            .checked_mul(NODE_SIZE as u64)
            .context("NodeStore: Temporary dense cache size overflow")?;
        temp_file
            .as_file()
            .set_len(file_size)
            .context("NodeStore: Failed to set temporary dense cache file length")?;

        // SAFETY: The file handle is exclusively owned by this struct and lives
        // as long as the mapping. No other process accesses this file.
        let mmap = unsafe {
            MmapMut::map_mut(temp_file.as_file())
                .context("NodeStore: Failed to map temporary dense cache file")?
        };

        Ok(Self {
            inner: LocationIndexImpl::Dense(DenseLocationIndex {
                mmap,
                max_nodes,
                _temp_file: temp_file,
            }),
        })
    }

    pub fn set(&mut self, id: i64, location: Location) -> Result<()> {
        let id = id as u64;
        match &mut self.inner {
            LocationIndexImpl::Sparse(index) => {
                index.set(id, location);
                Ok(())
            }
            LocationIndexImpl::Memory(index) => {
                index.nodes.insert(id, location);
                Ok(())
            }
            LocationIndexImpl::Dense(index) => index.set(id, location),
        }
    }

    /// Make the index ready for lookups after a run of `set` calls.
    /// Cheap when nothing was added out of order.
    pub fn prepare_lookups(&mut self) {
        if let LocationIndexImpl::Sparse(index) = &mut self.inner {
            index.sort();
        }
    }

    pub fn get(&self, id: i64) -> Option<Location> {
        let id = id as u64;
        match &self.inner {
            LocationIndexImpl::Sparse(index) => index.get(id),
            LocationIndexImpl::Memory(index) => index.nodes.get(&id).copied(),
            LocationIndexImpl::Dense(index) => index.get(id),
        }
    }
}

impl SparseLocationIndex {
    fn set(&mut self, id: u64, location: Location) {
        if let Some((last_id, _)) = self.entries.last()
            && id <= *last_id
        {
            self.sorted = false;
        }
        self.entries.push((id, location));
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        // Stable sort, so the first location seen for a node id survives dedup
        self.entries.sort_by_key(|(id, _)| *id);
        self.entries.dedup_by_key(|(id, _)| *id);
        self.sorted = true;
    }

    fn get(&self, id: u64) -> Option<Location> {
        debug_assert!(self.sorted, "prepare_lookups must run before get");
        self.entries
            .binary_search_by_key(&id, |(entry_id, _)| *entry_id)
            .ok()
            .map(|pos| self.entries[pos].1)
    }
}

impl DenseLocationIndex {
    fn set(&mut self, id: u64, location: Location) -> Result<()> {
        if id >= self.max_nodes {
            return Err(anyhow!(
                "NodeStore: Node ID {id} exceeds node_cache_max_nodes ({}); increase --node-cache-max-nodes or use --node-cache-mode sparse",
                self.max_nodes
            ));
        }

        let offset = (id as usize) * NODE_SIZE;
        let data = &mut self.mmap[offset..offset + NODE_SIZE];
        data[0..4].copy_from_slice(&location.x.to_le_bytes());
        data[4..8].copy_from_slice(&location.y.to_le_bytes());
        Ok(())
    }

    fn get(&self, id: u64) -> Option<Location> {
        if id >= self.max_nodes {
            return None;
        }

        let offset = (id as usize) * NODE_SIZE;
        let location = decode_location(&self.mmap[offset..offset + NODE_SIZE]);
        // Unwritten slots read back as zeroes; (0, 0) is far outside any
        // area this tool cares about, so it doubles as "not set".
        (location != Location { x: 0, y: 0 }).then_some(location)
    }
}

fn decode_location(data: &[u8]) -> Location {
    let mut x_bytes = [0u8; 4];
    let mut y_bytes = [0u8; 4];
    x_bytes.copy_from_slice(&data[0..4]);
    y_bytes.copy_from_slice(&data[4..8]);

    Location {
        x: i32::from_le_bytes(x_bytes),
        y: i32::from_le_bytes(y_bytes),
    }
}
