//! The container facade: opens a file, decodes its header into sections, and
//! fronts the traversal engine with query methods.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::decode::{
    ContainerHeader, MapObject, RegionDecoder, RegionSource, SectionHeader, StyleEvaluator,
};
use crate::error::{ObfError, Result};
use crate::query::{ResultPublisher, SearchQuery};
use crate::route::RouteEdge;
use crate::search::{LocatedSubregion, TraversalEngine};
use crate::section::{MapSection, RoutingSection, SectionInfo, SectionKind};
use crate::tree::{MapRoot, RouteSubregion};
use crate::types::{Config, FileRegion};

/// The only container format version this crate reads.
pub const SUPPORTED_VERSION: u32 = 2;

/// Random access over the container file. The handle sits behind a mutex so
/// concurrent queries serialize their seeks; `close` drops the handle while
/// the length and cap stay readable.
pub struct FileSource {
    file: Mutex<Option<File>>,
    len: u64,
    max_region_len: u32,
}

impl FileSource {
    fn new(file: File, len: u64, max_region_len: u32) -> Self {
        Self {
            file: Mutex::new(Some(file)),
            len,
            max_region_len,
        }
    }

    fn close(&self) {
        *self.file.lock() = None;
    }

    fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }
}

impl RegionSource for FileSource {
    fn read_region(&self, region: FileRegion) -> Result<Bytes> {
        if region.length > self.max_region_len {
            return Err(ObfError::format(format!(
                "region of {} bytes exceeds the {} byte cap",
                region.length, self.max_region_len
            )));
        }
        let in_bounds = region
            .offset
            .checked_add(u64::from(region.length))
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(ObfError::format(format!(
                "region at {} of {} bytes runs past end of file ({})",
                region.offset, region.length, self.len
            )));
        }

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(ObfError::ContainerClosed)?;
        file.seek(SeekFrom::Start(region.offset))?;
        let mut buf = vec![0u8; region.length as usize];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn source_len(&self) -> Result<u64> {
        Ok(self.len)
    }
}

/// An opened container: header metadata plus the lazily expanded section
/// forests. Cheap to share behind an `Arc`; queries take `&self` except for
/// their own mutable [`SearchQuery`].
pub struct MapContainer {
    path: PathBuf,
    version: u32,
    created: u64,
    basemap: bool,
    road_only: bool,
    live_map: bool,
    external: bool,
    sections: Vec<SectionInfo>,
    map_sections: Vec<Arc<MapSection>>,
    routing_sections: Vec<Arc<RoutingSection>>,
    decoder: Arc<dyn RegionDecoder>,
    config: Config,
    source: Arc<FileSource>,
}

impl fmt::Debug for MapContainer {
    // Manual impl: the decoder is a trait object.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapContainer")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("created", &self.created)
            .field("basemap", &self.basemap)
            .field("road_only", &self.road_only)
            .field("live_map", &self.live_map)
            .field("external", &self.external)
            .field("sections", &self.sections)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MapContainer {
    /// Open and index a container file. Fails hard on I/O errors, an
    /// unreadable header or an unsupported format version; per-subtree
    /// problems are deferred to query time.
    pub fn open(
        path: impl AsRef<Path>,
        decoder: Arc<dyn RegionDecoder>,
        config: Config,
    ) -> Result<Self> {
        config.validate().map_err(ObfError::InvalidConfig)?;

        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let source = Arc::new(FileSource::new(file, len, config.max_region_len));

        let header = decoder.read_header(source.as_ref())?;
        if header.version != SUPPORTED_VERSION {
            return Err(ObfError::UnsupportedVersion {
                found: header.version,
                supported: SUPPORTED_VERSION,
            });
        }

        let mut container = Self {
            path,
            version: header.version,
            created: header.created,
            basemap: header.basemap,
            road_only: header.road_only,
            live_map: header.live_map,
            external: header.external,
            sections: Vec::new(),
            map_sections: Vec::new(),
            routing_sections: Vec::new(),
            decoder,
            config,
            source,
        };
        container.index_sections(header)?;

        debug!(
            "opened {}: version {}, {} section(s), {} map, {} routing",
            container.path.display(),
            container.version,
            container.sections.len(),
            container.map_sections.len(),
            container.routing_sections.len()
        );
        Ok(container)
    }

    fn index_sections(&mut self, header: ContainerHeader) -> Result<()> {
        for section in header.sections {
            match section {
                SectionHeader::Map(map) => {
                    let mut built = MapSection::new(map.name.clone(), map.region);
                    for rule in &map.rules {
                        built.register_rule(rule.id, &rule.key, &rule.value);
                    }
                    built.finish_initializing_tags();
                    for root in &map.roots {
                        built.roots.push(MapRoot::new(
                            root.min_zoom,
                            root.max_zoom,
                            root.bounds,
                            root.region,
                        ));
                    }
                    self.sections.push(SectionInfo {
                        kind: SectionKind::Map,
                        name: map.name,
                        region: map.region,
                    });
                    self.map_sections.push(Arc::new(built));
                }
                SectionHeader::Routing(routing) => {
                    let mut built = RoutingSection::new(routing.name.clone(), routing.region);
                    for rule in &routing.rules {
                        built.register_rule(rule.id, &rule.key, &rule.value);
                    }
                    for sub in &routing.subregions {
                        built
                            .subregions
                            .push(Arc::new(RouteSubregion::new(sub.bounds, sub.region)));
                    }
                    for sub in &routing.base_subregions {
                        built
                            .base_subregions
                            .push(Arc::new(RouteSubregion::new(sub.bounds, sub.region)));
                    }
                    self.sections.push(SectionInfo {
                        kind: SectionKind::Routing,
                        name: routing.name,
                        region: routing.region,
                    });
                    self.routing_sections.push(Arc::new(built));
                }
                SectionHeader::Other(other) => {
                    self.sections.push(SectionInfo {
                        kind: other.kind,
                        name: other.name,
                        region: other.region,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Creation timestamp, milliseconds since the epoch.
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn is_basemap(&self) -> bool {
        self.basemap
    }

    pub fn is_road_only(&self) -> bool {
        self.road_only
    }

    pub fn is_live_map(&self) -> bool {
        self.live_map
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn map_sections(&self) -> &[Arc<MapSection>] {
        &self.map_sections
    }

    pub fn routing_sections(&self) -> &[Arc<RoutingSection>] {
        &self.routing_sections
    }

    /// Release the file handle. Idempotent; section metadata stays readable,
    /// further region reads fail with [`ObfError::ContainerClosed`].
    pub fn close(&self) {
        if !self.source.is_closed() {
            self.source.close();
            debug!("closed {}", self.path.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    fn engine(&self) -> TraversalEngine<'_> {
        TraversalEngine::new(
            self.source.as_ref(),
            self.decoder.as_ref(),
            self.config.strict_decode,
        )
    }

    /// Search every map section for objects intersecting the query box at the
    /// query zoom, applying `evaluator` to each candidate.
    pub fn search_map_objects(
        &self,
        query: &mut SearchQuery,
        evaluator: &dyn StyleEvaluator,
    ) -> Result<ResultPublisher<MapObject>> {
        if self.is_closed() {
            return Err(ObfError::ContainerClosed);
        }
        let engine = self.engine();
        let mut publisher = ResultPublisher::new();
        for section in &self.map_sections {
            if query.is_cancelled() {
                break;
            }
            engine.search_map(section, query, evaluator, &mut publisher)?;
        }
        Ok(publisher)
    }

    /// Find the payload-bearing route subregions intersecting the query box.
    /// `base` selects the coarse overview forest instead of the detail one.
    pub fn search_route_subregions(
        &self,
        query: &mut SearchQuery,
        base: bool,
    ) -> Result<Vec<LocatedSubregion>> {
        if self.is_closed() {
            return Err(ObfError::ContainerClosed);
        }
        let engine = self.engine();
        let mut found = Vec::new();
        for section in &self.routing_sections {
            if query.is_cancelled() {
                break;
            }
            let roots = if base {
                &section.base_subregions
            } else {
                &section.subregions
            };
            engine.collect_route_subregions(section, roots, query, &mut found)?;
        }
        Ok(found)
    }

    /// Decode the edges of previously located subregions, deduplicated by
    /// edge id across subregions.
    pub fn search_route_data(
        &self,
        query: &mut SearchQuery,
        subregions: &[LocatedSubregion],
    ) -> Result<Vec<RouteEdge>> {
        if self.is_closed() {
            return Err(ObfError::ContainerClosed);
        }
        let engine = self.engine();
        let mut publisher = ResultPublisher::new();
        for located in subregions {
            if query.is_cancelled() {
                break;
            }
            engine.read_route_edges(located, query, &mut publisher)?;
        }
        Ok(publisher.into_results())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    size: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Advisory registry of container files and their on-disk fingerprints.
/// Lets long-lived applications detect that a registered file was replaced
/// underneath an open container. Purely advisory: nothing here invalidates
/// open handles.
#[derive(Debug, Default)]
pub struct ContainerCache {
    entries: FxHashMap<PathBuf, Fingerprint>,
}

impl ContainerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current fingerprint of `path`.
    pub fn register(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let fingerprint = Fingerprint::of(&path)?;
        self.entries.insert(path, fingerprint);
        Ok(())
    }

    /// Whether `path` is registered and still matches its recorded
    /// fingerprint. Unregistered or missing files verify as `false`.
    pub fn verify(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match (self.entries.get(path), Fingerprint::of(path)) {
            (Some(recorded), Ok(current)) => *recorded == current,
            _ => false,
        }
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) -> bool {
        self.entries.remove(path.as_ref()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
