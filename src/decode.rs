//! Collaborator interfaces for the byte-level format decoding.
//!
//! This crate decides *when* and *what* to read; turning raw bytes into
//! decoded structures (varint/delta decoding, wire layout) is supplied by a
//! [`RegionDecoder`] implementation. The structures here are the contract
//! between the two layers.

use bytes::Bytes;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::Result;
use crate::query::Publishable;
use crate::route::RouteEdge;
use crate::section::SectionKind;
use crate::types::{BBox31, FileRegion};

/// Read-only random access to the container's bytes. Implemented by the
/// container over its file handle; consumed by decoders for header parsing.
pub trait RegionSource: Send + Sync {
    /// Read exactly `region.length` bytes at `region.offset`.
    fn read_region(&self, region: FileRegion) -> Result<Bytes>;

    /// Total length of the underlying file.
    fn source_len(&self) -> Result<u64>;
}

/// One tag decoding rule declared by a section header.
#[derive(Debug, Clone)]
pub struct TagRule {
    pub id: u32,
    pub key: String,
    pub value: String,
}

/// Root-level map tree descriptor with its zoom validity range.
#[derive(Debug, Clone)]
pub struct MapRootHeader {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub bounds: BBox31,
    pub region: FileRegion,
}

#[derive(Debug, Clone)]
pub struct MapSectionHeader {
    pub name: String,
    pub region: FileRegion,
    pub rules: Vec<TagRule>,
    pub roots: Vec<MapRootHeader>,
}

/// Root-level route subregion descriptor.
#[derive(Debug, Clone)]
pub struct SubregionHeader {
    pub bounds: BBox31,
    pub region: FileRegion,
}

#[derive(Debug, Clone)]
pub struct RoutingSectionHeader {
    pub name: String,
    pub region: FileRegion,
    pub rules: Vec<TagRule>,
    pub subregions: Vec<SubregionHeader>,
    pub base_subregions: Vec<SubregionHeader>,
}

/// Sections this crate records but does not query.
#[derive(Debug, Clone)]
pub struct OtherSectionHeader {
    pub kind: SectionKind,
    pub name: String,
    pub region: FileRegion,
}

#[derive(Debug, Clone)]
pub enum SectionHeader {
    Map(MapSectionHeader),
    Routing(RoutingSectionHeader),
    Other(OtherSectionHeader),
}

/// Fixed container header: format version, creation timestamp, classification
/// flags and the sequence of partition headers.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub version: u32,
    /// Creation timestamp, milliseconds since the epoch.
    pub created: u64,
    pub basemap: bool,
    pub road_only: bool,
    pub live_map: bool,
    pub external: bool,
    pub sections: Vec<SectionHeader>,
}

/// Child descriptor decoded from a tree-node region.
#[derive(Debug, Clone)]
pub struct ChildNode {
    pub bounds: BBox31,
    pub region: FileRegion,
}

/// Contents of one decoded tree-node region: child descriptors and, for
/// leaf-level nodes, the region of the payload block holding concrete objects.
#[derive(Debug, Clone, Default)]
pub struct DecodedNode {
    pub children: Vec<ChildNode>,
    pub payload: Option<FileRegion>,
}

/// A decoded map-geometry object.
///
/// Deliberately lean: enough for deduplication, the style predicate and the
/// rendering caller. Coordinates are 31-bit fixed point.
#[derive(Debug, Clone)]
pub struct MapObject {
    pub id: i64,
    pub points_x: Vec<i32>,
    pub points_y: Vec<i32>,
    /// Tag-dictionary ids of the object's attributes.
    pub types: SmallVec<[u32; 4]>,
    /// Additional (non-styling) attribute ids.
    pub extra_types: SmallVec<[u32; 4]>,
    /// Name-type id -> string value.
    pub names: FxHashMap<u32, String>,
}

impl MapObject {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            points_x: Vec::new(),
            points_y: Vec::new(),
            types: SmallVec::new(),
            extra_types: SmallVec::new(),
            names: FxHashMap::default(),
        }
    }

    /// An arbitrary entry of the name table, or empty.
    pub fn name(&self) -> String {
        self.names.values().next().cloned().unwrap_or_default()
    }
}

impl Publishable for MapObject {
    fn object_id(&self) -> i64 {
        self.id
    }
}

impl Publishable for RouteEdge {
    fn object_id(&self) -> i64 {
        self.id
    }
}

/// The format-decoding collaborator: bytes in, decoded structures out.
///
/// Implementations own the wire layout (varints, deltas, string tables) and
/// must tolerate malformed input by returning `InvalidFormat` rather than
/// panicking; the traversal engine turns per-region failures into skipped
/// subtrees.
pub trait RegionDecoder: Send + Sync {
    /// Parse the fixed header: version, creation timestamp and the partition
    /// headers with their tag rules and root node descriptors.
    fn read_header(&self, source: &dyn RegionSource) -> Result<ContainerHeader>;

    /// Decode a map tree-node region into child descriptors and an optional
    /// payload region. `bounds` are the node's own bounds, available for
    /// delta-encoded child boxes.
    fn read_map_node(&self, data: &[u8], bounds: &BBox31) -> Result<DecodedNode>;

    /// Decode a map payload block into concrete objects.
    fn read_map_block(&self, data: &[u8]) -> Result<Vec<MapObject>>;

    /// Decode a route subregion region into child descriptors and an optional
    /// payload region.
    fn read_route_node(&self, data: &[u8], bounds: &BBox31) -> Result<DecodedNode>;

    /// Decode a route payload block into edges. Edges come back unbound; the
    /// engine attaches the owning section.
    fn read_route_block(&self, data: &[u8]) -> Result<Vec<RouteEdge>>;
}

/// Opaque style predicate supplied by the rendering caller. Consulted once
/// per candidate map object; route edges bypass it.
pub trait StyleEvaluator {
    fn accept(&self, object: &MapObject, zoom: u8) -> bool;
}

/// Pass-through evaluator, useful for data extraction and tests.
#[derive(Debug, Default)]
pub struct AcceptAll;

impl StyleEvaluator for AcceptAll {
    fn accept(&self, _object: &MapObject, _zoom: u8) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_object_name() {
        let mut obj = MapObject::new(42);
        assert_eq!(obj.name(), "");
        obj.names.insert(0, "Lakeview".to_string());
        assert_eq!(obj.name(), "Lakeview");
        assert_eq!(obj.object_id(), 42);
    }

    #[test]
    fn test_accept_all() {
        let obj = MapObject::new(1);
        assert!(AcceptAll.accept(&obj, 14));
    }
}
