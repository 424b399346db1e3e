//! Spatial traversal over the section index forests.
//!
//! The engine walks bounding-box trees top-down: prune on intersection, force
//! the node's one-time expansion, decode intersecting payload blocks, recurse.
//! Per-node decode failures degrade to skipped subtrees (remembered in the
//! node's cache) unless the container was opened in strict mode.

use std::sync::Arc;

use log::warn;

use crate::decode::{MapObject, RegionDecoder, RegionSource, StyleEvaluator};
use crate::error::{ObfError, Result};
use crate::query::{ResultPublisher, SearchQuery};
use crate::route::RouteEdge;
use crate::section::{MapSection, RoutingSection};
use crate::tree::{Expansion, MapTreeNode, RouteSubregion};
use crate::types::FileRegion;

/// A payload-bearing route subregion paired with its owning section, so edge
/// decoding can bind attribute lookups back to the section's dictionary.
#[derive(Debug, Clone)]
pub struct LocatedSubregion {
    pub section: Arc<RoutingSection>,
    pub node: Arc<RouteSubregion>,
}

/// Stateless traversal over one container's sections. Borrows the byte source
/// and decoder; all per-request state lives in the query and publisher.
pub struct TraversalEngine<'a> {
    source: &'a dyn RegionSource,
    decoder: &'a dyn RegionDecoder,
    strict: bool,
}

impl<'a> TraversalEngine<'a> {
    pub fn new(source: &'a dyn RegionSource, decoder: &'a dyn RegionDecoder, strict: bool) -> Self {
        Self {
            source,
            decoder,
            strict,
        }
    }

    /// Search one map section's forest, walking only roots whose zoom range
    /// covers the query zoom.
    pub fn search_map(
        &self,
        section: &MapSection,
        query: &mut SearchQuery,
        evaluator: &dyn StyleEvaluator,
        publisher: &mut ResultPublisher<MapObject>,
    ) -> Result<()> {
        for root in &section.roots {
            if !root.covers_zoom(query.zoom) {
                continue;
            }
            self.search_map_node(&root.node, query, evaluator, publisher)?;
        }
        Ok(())
    }

    fn search_map_node(
        &self,
        node: &MapTreeNode,
        query: &mut SearchQuery,
        evaluator: &dyn StyleEvaluator,
        publisher: &mut ResultPublisher<MapObject>,
    ) -> Result<()> {
        if query.is_cancelled() {
            return Ok(());
        }
        if !node.bounds.intersects(&query.bbox) {
            return Ok(());
        }
        query.stats.read_subtrees += 1;

        let mut failure = None;
        let expansion = node.expansion.get_or_init(|| {
            match self.expand_map_node(node) {
                Ok(expansion) => expansion,
                Err(err) => {
                    warn!(
                        "skipping unreadable map subtree at offset {}: {err}",
                        node.region.offset
                    );
                    failure = Some(err);
                    Expansion::Failed
                }
            }
        });
        if let Some(err) = failure {
            if self.strict {
                return Err(err);
            }
        }
        let (children, payload) = match expansion {
            Expansion::Loaded { children, payload } => (children, payload),
            Expansion::Failed => return Ok(()),
        };
        query.stats.accepted_subtrees += 1;

        if let Some(payload) = payload {
            self.read_map_block(*payload, query, evaluator, publisher)?;
        }

        for child in children {
            self.search_map_node(child, query, evaluator, publisher)?;
        }
        Ok(())
    }

    fn expand_map_node(&self, node: &MapTreeNode) -> Result<Expansion<MapTreeNode>> {
        let data = self.source.read_region(node.region)?;
        let decoded = self.decoder.read_map_node(&data, &node.bounds)?;

        let mut children = Vec::with_capacity(decoded.children.len());
        for child in decoded.children {
            if !node.bounds.contains(&child.bounds) {
                return Err(ObfError::format(format!(
                    "child box {:?} escapes parent box {:?}",
                    child.bounds, node.bounds
                )));
            }
            children.push(Arc::new(MapTreeNode::new(child.bounds, child.region)));
        }
        Ok(Expansion::Loaded {
            children,
            payload: decoded.payload,
        })
    }

    fn read_map_block(
        &self,
        region: FileRegion,
        query: &mut SearchQuery,
        evaluator: &dyn StyleEvaluator,
        publisher: &mut ResultPublisher<MapObject>,
    ) -> Result<()> {
        if query.is_cancelled() {
            return Ok(());
        }
        let objects = match self
            .source
            .read_region(region)
            .and_then(|data| self.decoder.read_map_block(&data))
        {
            Ok(objects) => objects,
            Err(err) if !self.strict => {
                warn!(
                    "skipping unreadable map block at offset {}: {err}",
                    region.offset
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        for object in objects {
            if query.is_cancelled() {
                return Ok(());
            }
            query.stats.visited_objects += 1;
            if !evaluator.accept(&object, query.zoom) {
                continue;
            }
            if publisher.publish(object) {
                query.stats.accepted_objects += 1;
            }
        }
        Ok(())
    }

    /// Collect the payload-bearing subregions of one routing forest that
    /// intersect the query box, expanding nodes along the way.
    pub fn collect_route_subregions(
        &self,
        section: &Arc<RoutingSection>,
        roots: &[Arc<RouteSubregion>],
        query: &mut SearchQuery,
        out: &mut Vec<LocatedSubregion>,
    ) -> Result<()> {
        for root in roots {
            self.collect_route_node(section, root, query, out)?;
        }
        Ok(())
    }

    fn collect_route_node(
        &self,
        section: &Arc<RoutingSection>,
        node: &Arc<RouteSubregion>,
        query: &mut SearchQuery,
        out: &mut Vec<LocatedSubregion>,
    ) -> Result<()> {
        if query.is_cancelled() {
            return Ok(());
        }
        if !node.bounds.intersects(&query.bbox) {
            return Ok(());
        }
        query.stats.read_subtrees += 1;

        let mut failure = None;
        let expansion = node.expansion.get_or_init(|| {
            match self.expand_route_node(node) {
                Ok(expansion) => expansion,
                Err(err) => {
                    warn!(
                        "skipping unreadable route subregion at offset {}: {err}",
                        node.region.offset
                    );
                    failure = Some(err);
                    Expansion::Failed
                }
            }
        });
        if let Some(err) = failure {
            if self.strict {
                return Err(err);
            }
        }
        let children = match expansion {
            Expansion::Loaded { children, .. } => children,
            Expansion::Failed => return Ok(()),
        };
        query.stats.accepted_subtrees += 1;

        if node.has_payload() {
            out.push(LocatedSubregion {
                section: Arc::clone(section),
                node: Arc::clone(node),
            });
        }

        for child in children {
            self.collect_route_node(section, child, query, out)?;
        }
        Ok(())
    }

    fn expand_route_node(&self, node: &RouteSubregion) -> Result<Expansion<RouteSubregion>> {
        let data = self.source.read_region(node.region)?;
        let decoded = self.decoder.read_route_node(&data, &node.bounds)?;

        let mut children = Vec::with_capacity(decoded.children.len());
        for child in decoded.children {
            if !node.bounds.contains(&child.bounds) {
                return Err(ObfError::format(format!(
                    "child box {:?} escapes parent box {:?}",
                    child.bounds, node.bounds
                )));
            }
            children.push(Arc::new(RouteSubregion::new(child.bounds, child.region)));
        }
        Ok(Expansion::Loaded {
            children,
            payload: decoded.payload,
        })
    }

    /// Decode the edges of one located subregion, binding each edge to its
    /// owning section for attribute lookups.
    pub fn read_route_edges(
        &self,
        located: &LocatedSubregion,
        query: &mut SearchQuery,
        publisher: &mut ResultPublisher<RouteEdge>,
    ) -> Result<()> {
        let Some(payload) = located.node.payload() else {
            return Ok(());
        };
        if query.is_cancelled() {
            return Ok(());
        }
        let edges = match self
            .source
            .read_region(payload)
            .and_then(|data| self.decoder.read_route_block(&data))
        {
            Ok(edges) => edges,
            Err(err) if !self.strict => {
                warn!(
                    "skipping unreadable route block at offset {}: {err}",
                    payload.offset
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        for mut edge in edges {
            if query.is_cancelled() {
                return Ok(());
            }
            query.stats.visited_objects += 1;
            edge.attach_section(Arc::downgrade(&located.section));
            if publisher.publish(edge) {
                query.stats.accepted_objects += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use rustc_hash::FxHashMap;

    use crate::decode::{AcceptAll, ChildNode, ContainerHeader, DecodedNode};
    use crate::query::CancellationFlag;
    use crate::tree::MapRoot;
    use crate::types::{BBox31, FileRegion};

    /// In-memory byte source; contents are irrelevant because the scripted
    /// decoder keys off region offsets.
    struct MemorySource {
        len: u64,
    }

    impl RegionSource for MemorySource {
        fn read_region(&self, region: FileRegion) -> Result<Bytes> {
            if region.offset + u64::from(region.length) > self.len {
                return Err(ObfError::format("region out of bounds"));
            }
            Ok(Bytes::from(vec![0u8; region.length as usize]))
        }

        fn source_len(&self) -> Result<u64> {
            Ok(self.len)
        }
    }

    /// Decoder scripted per region offset. Offsets absent from the maps
    /// decode as errors.
    #[derive(Default)]
    struct ScriptedDecoder {
        nodes: FxHashMap<u64, DecodedNode>,
        map_blocks: FxHashMap<u64, Vec<MapObject>>,
        route_blocks: FxHashMap<u64, Vec<RouteEdge>>,
        node_decodes: Mutex<u64>,
    }

    impl ScriptedDecoder {
        fn node(&self, offset: u64) -> Result<DecodedNode> {
            *self.node_decodes.lock() += 1;
            self.nodes
                .get(&offset)
                .cloned()
                .ok_or_else(|| ObfError::format(format!("no node at {offset}")))
        }
    }

    impl RegionDecoder for ScriptedDecoder {
        fn read_header(&self, _source: &dyn RegionSource) -> Result<ContainerHeader> {
            Err(ObfError::format("not scripted"))
        }

        fn read_map_node(&self, data: &[u8], _bounds: &BBox31) -> Result<DecodedNode> {
            // The memory source hands back zero-filled bytes of the region's
            // length; recover the offset from a side table instead. Tests
            // encode the offset as the region length for simplicity.
            self.node(data.len() as u64)
        }

        fn read_map_block(&self, data: &[u8]) -> Result<Vec<MapObject>> {
            self.map_blocks
                .get(&(data.len() as u64))
                .cloned()
                .ok_or_else(|| ObfError::format("no map block"))
        }

        fn read_route_node(&self, data: &[u8], _bounds: &BBox31) -> Result<DecodedNode> {
            self.node(data.len() as u64)
        }

        fn read_route_block(&self, data: &[u8]) -> Result<Vec<RouteEdge>> {
            self.route_blocks
                .get(&(data.len() as u64))
                .cloned()
                .ok_or_else(|| ObfError::format("no route block"))
        }
    }

    /// Region whose length doubles as its script key.
    fn keyed(key: u32) -> FileRegion {
        FileRegion::new(0, key)
    }

    fn object(id: i64) -> MapObject {
        MapObject::new(id)
    }

    /// One root over (0..100)^2 with two children: a west half holding a
    /// payload block of objects 1 and 2, and an east half holding a block of
    /// objects 2 and 3 (2 is duplicated across the boundary).
    fn map_section_fixture(decoder: &mut ScriptedDecoder) -> MapSection {
        decoder.nodes.insert(
            10,
            DecodedNode {
                children: vec![
                    ChildNode {
                        bounds: BBox31::new(0, 50, 0, 100),
                        region: keyed(11),
                    },
                    ChildNode {
                        bounds: BBox31::new(50, 100, 0, 100),
                        region: keyed(12),
                    },
                ],
                payload: None,
            },
        );
        decoder.nodes.insert(
            11,
            DecodedNode {
                children: vec![],
                payload: Some(keyed(21)),
            },
        );
        decoder.nodes.insert(
            12,
            DecodedNode {
                children: vec![],
                payload: Some(keyed(22)),
            },
        );
        decoder
            .map_blocks
            .insert(21, vec![object(1), object(2)]);
        decoder
            .map_blocks
            .insert(22, vec![object(2), object(3)]);

        let mut section = MapSection::new("fixture", FileRegion::new(0, 4096));
        section
            .roots
            .push(MapRoot::new(1, 21, BBox31::new(0, 100, 0, 100), keyed(10)));
        section
    }

    #[test]
    fn test_map_search_deduplicates_across_blocks() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 14);
        let mut publisher = ResultPublisher::new();
        engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap();

        let mut ids: Vec<i64> = publisher.results().iter().map(|o| o.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(query.stats.visited_objects, 4);
        assert_eq!(query.stats.accepted_objects, 3);
        assert_eq!(query.stats.read_subtrees, 3);
        assert_eq!(query.stats.accepted_subtrees, 3);
    }

    #[test]
    fn test_disjoint_query_reads_nothing() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        let mut query = SearchQuery::new(BBox31::new(500, 600, 500, 600), 14);
        let mut publisher = ResultPublisher::new();
        engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap();

        assert!(publisher.is_empty());
        // The root intersects nothing: not even its region is read.
        assert_eq!(query.stats.read_subtrees, 0);
        assert_eq!(*decoder.node_decodes.lock(), 0);
    }

    #[test]
    fn test_zoom_filter_skips_roots() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 22);
        let mut publisher = ResultPublisher::new();
        engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap();

        assert!(publisher.is_empty());
        assert_eq!(query.stats.read_subtrees, 0);
    }

    #[test]
    fn test_repeated_search_expands_once() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        for _ in 0..2 {
            let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 14);
            let mut publisher = ResultPublisher::new();
            engine
                .search_map(&section, &mut query, &AcceptAll, &mut publisher)
                .unwrap();
            assert_eq!(publisher.len(), 3);
        }
        // Three tree nodes, each decoded exactly once across both queries.
        assert_eq!(*decoder.node_decodes.lock(), 3);
    }

    #[test]
    fn test_corrupt_subtree_degrades_and_is_remembered() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        // Make the east child undecodable.
        decoder.nodes.remove(&12);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        for _ in 0..2 {
            let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 14);
            let mut publisher = ResultPublisher::new();
            engine
                .search_map(&section, &mut query, &AcceptAll, &mut publisher)
                .unwrap();
            let mut ids: Vec<i64> = publisher.results().iter().map(|o| o.id).collect();
            ids.sort_unstable();
            assert_eq!(ids, vec![1, 2]);
        }
        // Root + both children on the first pass; the failure is cached so
        // the second pass decodes nothing new.
        assert_eq!(*decoder.node_decodes.lock(), 3);
    }

    #[test]
    fn test_strict_mode_propagates_decode_errors() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        decoder.nodes.remove(&12);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, true);

        let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 14);
        let mut publisher = ResultPublisher::new();
        let err = engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap_err();
        assert!(matches!(err, ObfError::InvalidFormat(_)));
    }

    #[test]
    fn test_escaping_child_box_is_rejected() {
        let mut decoder = ScriptedDecoder::default();
        decoder.nodes.insert(
            10,
            DecodedNode {
                children: vec![ChildNode {
                    bounds: BBox31::new(0, 200, 0, 100),
                    region: keyed(11),
                }],
                payload: None,
            },
        );
        let mut section = MapSection::new("fixture", FileRegion::new(0, 4096));
        section
            .roots
            .push(MapRoot::new(1, 21, BBox31::new(0, 100, 0, 100), keyed(10)));

        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);
        let mut query = SearchQuery::new(BBox31::new(0, 100, 0, 100), 14);
        let mut publisher = ResultPublisher::new();
        // Lenient mode: the malformed subtree is skipped, not fatal.
        engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap();
        assert!(publisher.is_empty());
        assert!(section.roots[0].node.is_expanded());
    }

    #[test]
    fn test_cancellation_stops_descent() {
        let mut decoder = ScriptedDecoder::default();
        let section = map_section_fixture(&mut decoder);
        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);

        let flag = Arc::new(CancellationFlag::new());
        flag.cancel();
        let mut query =
            SearchQuery::new(BBox31::new(0, 100, 0, 100), 14).with_cancellation(flag);
        let mut publisher = ResultPublisher::new();
        engine
            .search_map(&section, &mut query, &AcceptAll, &mut publisher)
            .unwrap();

        assert!(publisher.is_empty());
        assert_eq!(query.stats.read_subtrees, 0);
    }

    #[test]
    fn test_route_collection_and_edge_decode() {
        let mut decoder = ScriptedDecoder::default();
        decoder.nodes.insert(
            10,
            DecodedNode {
                children: vec![ChildNode {
                    bounds: BBox31::new(0, 50, 0, 50),
                    region: keyed(11),
                }],
                payload: None,
            },
        );
        decoder.nodes.insert(
            11,
            DecodedNode {
                children: vec![],
                payload: Some(keyed(31)),
            },
        );
        let mut edge = RouteEdge::new(900);
        edge.points_x = vec![10, 20];
        edge.points_y = vec![10, 20];
        edge.types = vec![0];
        decoder.route_blocks.insert(31, vec![edge]);

        let mut section = RoutingSection::new("routes", FileRegion::new(0, 4096));
        section.register_rule(0, "highway", "secondary");
        section
            .subregions
            .push(Arc::new(RouteSubregion::new(BBox31::new(0, 100, 0, 100), keyed(10))));
        let section = Arc::new(section);

        let source = MemorySource { len: 1 << 20 };
        let engine = TraversalEngine::new(&source, &decoder, false);
        let mut query = SearchQuery::new(BBox31::new(0, 40, 0, 40), 15);

        let mut found = Vec::new();
        engine
            .collect_route_subregions(&section, &section.subregions, &mut query, &mut found)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].node.has_payload());
        assert!(format!("{:?}", found[0]).contains("LocatedSubregion"));

        let mut publisher = ResultPublisher::new();
        engine
            .read_route_edges(&found[0], &mut query, &mut publisher)
            .unwrap();
        assert_eq!(publisher.len(), 1);
        let edge = &publisher.results()[0];
        assert_eq!(edge.id, 900);
        // The edge is bound to its section: dictionary lookups resolve.
        assert_eq!(edge.value_of("highway"), "secondary");
    }
}
