//! Spatial index nodes: bounding-box tree nodes pointing at file regions.
//!
//! Nodes are created from header metadata with an empty child cache; a query
//! that reaches a node forces a one-time decode of its file region. The cache
//! fill is modeled as an explicit state transition (`Unloaded -> Loaded` or
//! `Unloaded -> Failed`) behind a `OnceCell`, so concurrent queries touching
//! the same node neither race nor duplicate-decode, and a failed decode is
//! remembered instead of retried.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::types::{BBox31, FileRegion};

/// Outcome of expanding a node's file region.
#[derive(Debug)]
pub(crate) enum Expansion<T> {
    /// Child descriptors plus the payload region holding this node's concrete
    /// objects, if it carries one.
    Loaded {
        children: Vec<Arc<T>>,
        payload: Option<FileRegion>,
    },
    /// The region was unreadable or structurally invalid. Kept so the subtree
    /// is skipped on later queries without re-reading.
    Failed,
}

/// A node of a map partition's bounding-box tree.
#[derive(Debug)]
pub struct MapTreeNode {
    pub bounds: BBox31,
    pub region: FileRegion,
    pub(crate) expansion: OnceCell<Expansion<MapTreeNode>>,
}

impl MapTreeNode {
    pub fn new(bounds: BBox31, region: FileRegion) -> Self {
        Self {
            bounds,
            region,
            expansion: OnceCell::new(),
        }
    }

    /// Whether the node's children have been decoded (successfully or not).
    pub fn is_expanded(&self) -> bool {
        self.expansion.get().is_some()
    }
}

/// A root-level map tree, valid for a zoom range.
#[derive(Debug)]
pub struct MapRoot {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub node: Arc<MapTreeNode>,
}

impl MapRoot {
    pub fn new(min_zoom: u8, max_zoom: u8, bounds: BBox31, region: FileRegion) -> Self {
        Self {
            min_zoom,
            max_zoom,
            node: Arc::new(MapTreeNode::new(bounds, region)),
        }
    }

    pub fn covers_zoom(&self, zoom: u8) -> bool {
        self.min_zoom <= zoom && zoom <= self.max_zoom
    }
}

/// A node of a routing partition's subregion tree.
///
/// Unlike map tree nodes, route subregions are also the unit handed back to
/// callers: a subregion search returns the intersecting payload-bearing nodes,
/// and route data is decoded per subregion afterwards.
#[derive(Debug)]
pub struct RouteSubregion {
    pub bounds: BBox31,
    pub region: FileRegion,
    pub(crate) expansion: OnceCell<Expansion<RouteSubregion>>,
}

impl RouteSubregion {
    pub fn new(bounds: BBox31, region: FileRegion) -> Self {
        Self {
            bounds,
            region,
            expansion: OnceCell::new(),
        }
    }

    /// Region of the data block holding this subregion's route edges. Known
    /// only after the node has been expanded; present on leaf-level
    /// subregions only.
    pub fn payload(&self) -> Option<FileRegion> {
        match self.expansion.get() {
            Some(Expansion::Loaded { payload, .. }) => *payload,
            _ => None,
        }
    }

    pub fn has_payload(&self) -> bool {
        self.payload().is_some()
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion.get().is_some()
    }
}
