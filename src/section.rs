//! Container partitions: self-contained sections holding one category of data
//! with their own tag dictionary and spatial index forest.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::tags::TagDictionary;
use crate::tree::{MapRoot, RouteSubregion};
use crate::types::FileRegion;

/// Category of data a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Map,
    Poi,
    Address,
    Transport,
    Routing,
}

/// Header-level description shared by all section kinds. POI, address and
/// transport sections are recorded but not queried by this crate.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub kind: SectionKind,
    pub name: String,
    pub region: FileRegion,
}

/// Semantic attribute ids of a map section, resolved once while the tag
/// dictionary is built. An id stays `None` when no registered pair matched.
#[derive(Debug, Default, Clone)]
pub struct MapSemantics {
    pub name: Option<u32>,
    pub reference: Option<u32>,
    pub coastline: Option<u32>,
    pub coastline_broken: Option<u32>,
    pub land: Option<u32>,
    pub oneway: Option<u32>,
    pub oneway_reverse: Option<u32>,
}

/// A map-geometry partition: tag dictionary, per-zoom root forest and the
/// semantic ids the traversal and styling layers care about.
#[derive(Debug)]
pub struct MapSection {
    pub name: String,
    pub region: FileRegion,
    pub tags: TagDictionary,
    pub roots: Vec<MapRoot>,
    pub semantics: MapSemantics,
    /// Ids of `layer=v` pairs with positive / negative values.
    pub positive_layers: FxHashSet<u32>,
    pub negative_layers: FxHashSet<u32>,
}

impl MapSection {
    pub fn new(name: impl Into<String>, region: FileRegion) -> Self {
        Self {
            name: name.into(),
            region,
            tags: TagDictionary::new(),
            roots: Vec::new(),
            semantics: MapSemantics::default(),
            positive_layers: FxHashSet::default(),
            negative_layers: FxHashSet::default(),
        }
    }

    /// Register one decoding rule and resolve semantic ids as a side effect.
    pub fn register_rule(&mut self, id: u32, key: &str, value: &str) {
        self.tags.register(id, key, value);

        match key {
            "name" => self.semantics.name = Some(id),
            "ref" => self.semantics.reference = Some(id),
            "natural" if value == "coastline" => self.semantics.coastline = Some(id),
            "natural" if value == "land" => self.semantics.land = Some(id),
            "oneway" if value == "yes" => self.semantics.oneway = Some(id),
            "oneway" if value == "-1" => self.semantics.oneway_reverse = Some(id),
            "layer" if !value.is_empty() && value != "0" => {
                if value.starts_with('-') {
                    self.negative_layers.insert(id);
                } else {
                    self.positive_layers.insert(id);
                }
            }
            _ => {}
        }
    }

    /// Must run after the dictionary is fully populated. Synthesizes a
    /// broken-coastline marker and, if the container never declared one, a
    /// default land marker, each under a fresh unused id.
    pub fn finish_initializing_tags(&mut self) {
        let mut free = 2 * self.tags.len() as u32 + 1;

        self.register_rule(free, "natural", "coastline_broken");
        self.semantics.coastline_broken = Some(free);
        free += 1;

        if self.semantics.land.is_none() {
            self.register_rule(free, "natural", "land");
        }
    }
}

/// A routing-network partition. The full-detail forest and the coarse
/// always-resident overview forest are separate root sets over the same
/// algorithm; callers pick which one a query walks.
#[derive(Debug)]
pub struct RoutingSection {
    pub name: String,
    pub region: FileRegion,
    pub tags: TagDictionary,
    pub subregions: Vec<Arc<RouteSubregion>>,
    pub base_subregions: Vec<Arc<RouteSubregion>>,
}

impl RoutingSection {
    pub fn new(name: impl Into<String>, region: FileRegion) -> Self {
        Self {
            name: name.into(),
            region,
            tags: TagDictionary::new(),
            subregions: Vec::new(),
            base_subregions: Vec::new(),
        }
    }

    /// Register one route encoding rule.
    pub fn register_rule(&mut self, id: u32, key: &str, value: &str) {
        self.tags.register(id, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> MapSection {
        MapSection::new("test-map", FileRegion::new(0, 1024))
    }

    #[test]
    fn test_semantic_resolution() {
        let mut s = section();
        s.register_rule(0, "name", "");
        s.register_rule(1, "natural", "coastline");
        s.register_rule(2, "oneway", "yes");
        s.register_rule(3, "oneway", "-1");
        s.register_rule(4, "ref", "");

        assert_eq!(s.semantics.name, Some(0));
        assert_eq!(s.semantics.coastline, Some(1));
        assert_eq!(s.semantics.oneway, Some(2));
        assert_eq!(s.semantics.oneway_reverse, Some(3));
        assert_eq!(s.semantics.reference, Some(4));
        // Never registered: stays unset.
        assert_eq!(s.semantics.land, None);
        assert_eq!(s.semantics.coastline_broken, None);
    }

    #[test]
    fn test_layer_sets() {
        let mut s = section();
        s.register_rule(0, "layer", "1");
        s.register_rule(1, "layer", "-2");
        s.register_rule(2, "layer", "0");
        s.register_rule(3, "layer", "");

        assert!(s.positive_layers.contains(&0));
        assert!(s.negative_layers.contains(&1));
        assert!(!s.positive_layers.contains(&2));
        assert!(!s.positive_layers.contains(&3));
    }

    #[test]
    fn test_finish_initializing_tags_synthesizes_pairs() {
        let mut s = section();
        s.register_rule(0, "name", "");
        s.register_rule(1, "highway", "primary");

        s.finish_initializing_tags();

        let broken = s.semantics.coastline_broken.expect("broken coastline id");
        assert_eq!(broken, 2 * 2 + 1);
        let pair = s.tags.lookup(broken).unwrap();
        assert_eq!((pair.key.as_str(), pair.value.as_str()), ("natural", "coastline_broken"));

        let land = s.semantics.land.expect("default land id");
        assert_eq!(land, broken + 1);
        assert_eq!(s.tags.lookup(land).unwrap().value, "land");
    }

    #[test]
    fn test_finish_initializing_tags_keeps_existing_land() {
        let mut s = section();
        s.register_rule(0, "natural", "land");
        s.finish_initializing_tags();

        assert_eq!(s.semantics.land, Some(0));
        assert!(s.semantics.coastline_broken.is_some());
    }

    #[test]
    fn test_routing_section_rules() {
        let mut r = RoutingSection::new("routes", FileRegion::new(0, 64));
        r.register_rule(4, "highway", "motorway");

        // Gap ids backfilled by the dictionary.
        assert!(r.tags.lookup(2).is_ok());
        assert_eq!(r.tags.lookup(4).unwrap().value, "motorway");
    }
}
