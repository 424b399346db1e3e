//! Reader and spatial query engine for binary offline map containers.
//!
//! A container file holds map-geometry and routing-network sections, each
//! fronted by a bounding-box tree over byte regions of the file. Opening a
//! container decodes only the header; tree nodes are expanded on first touch
//! by a query and the expansion is cached for the container's lifetime.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use obfread::{BBox31, Config, MapContainer, SearchQuery};
//! use obfread::decode::AcceptAll;
//! # fn decoder() -> Arc<dyn obfread::decode::RegionDecoder> { unimplemented!() }
//!
//! let container = MapContainer::open("region.obf", decoder(), Config::default())?;
//! let mut query = SearchQuery::new(BBox31::new(0, 1 << 20, 0, 1 << 20), 14);
//! let results = container.search_map_objects(&mut query, &AcceptAll)?;
//! println!("{} objects, {} subtrees read", results.len(), query.stats.read_subtrees);
//! # Ok::<(), obfread::ObfError>(())
//! ```

pub mod container;
pub mod decode;
pub mod error;
pub mod geom;
pub mod query;
pub mod route;
pub mod search;
pub mod section;
pub mod tags;
pub mod tree;
pub mod types;

pub use container::{ContainerCache, MapContainer, SUPPORTED_VERSION};
pub use error::{ObfError, Result};

pub use geo::Point;

pub use decode::{AcceptAll, MapObject, RegionDecoder, RegionSource, StyleEvaluator};

pub use query::{
    CancellationFlag, CancellationPolicy, NeverCancelled, Publishable, ResultPublisher,
    SearchQuery, SearchStats,
};

pub use route::{RouteEdge, parse_length, parse_speed, parse_weight_in_ton};

pub use search::LocatedSubregion;

pub use section::{MapSection, RoutingSection, SectionInfo, SectionKind};

pub use tags::{TagDictionary, TagValue};

pub use tree::{MapRoot, MapTreeNode, RouteSubregion};

pub use types::{BBox31, Config, FileRegion};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Config, MapContainer, ObfError, Result, SearchQuery};

    pub use geo::Point;

    pub use crate::{BBox31, FileRegion};

    pub use crate::{CancellationFlag, ResultPublisher, SearchStats};

    pub use crate::{AcceptAll, RegionDecoder, StyleEvaluator};

    pub use crate::{MapObject, RouteEdge};

    pub use std::sync::Arc;
}
