//! Decoded routing-network edges: polyline geometry, per-point attributes,
//! turn restrictions and the derived elevation profile.
//!
//! Attribute values arrive as free-text OSM strings; the unit-aware parsers at
//! the bottom of this module convert them to SI units with the exact
//! conversions the shipped data was authored against (including two inherited
//! asymmetries in `parse_speed`, see DESIGN.md).

use std::sync::Weak;

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::geom;
use crate::section::RoutingSection;

/// Restriction encoding: low bits hold the restriction kind, the rest the
/// target edge id.
pub const RESTRICTION_SHIFT: u32 = 3;
pub const RESTRICTION_MASK: u64 = 0b111;

/// Sentinel elevation for points with no known height.
pub const HEIGHT_UNDEFINED: f64 = -80_000.0;

/// Speed assigned to `maxspeed=none` (engine working unit; intentionally not
/// run through the km/h conversion, matching observed data).
const SPEED_NONE_CAP: f64 = 40.0;

/// Per-point attribute id list. Edges rarely carry more than a couple of ids
/// per point.
pub type PointTypeSet = SmallVec<[u32; 2]>;

/// One `(segment_distance, elevation)` sample of the height profile.
pub type HeightSample = (f64, f64);

/// A decoded routing-network segment.
///
/// Point-indexed attribute sequences are parallel to the geometry; when
/// non-empty they never exceed the point count. The owning section is held
/// weakly: once the container is gone, attribute resolution degrades to
/// "absent" instead of failing.
#[derive(Debug, Clone)]
pub struct RouteEdge {
    pub id: i64,
    pub(crate) section: Weak<RoutingSection>,
    pub points_x: Vec<i32>,
    pub points_y: Vec<i32>,
    /// Tag-dictionary ids describing the edge as a whole.
    pub types: Vec<u32>,
    /// Per-point attribute ids, parallel to the geometry.
    pub point_types: Vec<PointTypeSet>,
    pub point_name_types: Vec<PointTypeSet>,
    pub point_name_ids: Vec<PointTypeSet>,
    pub point_names: Vec<Vec<String>>,
    /// Packed turn restrictions; see [`RESTRICTION_SHIFT`] / [`RESTRICTION_MASK`].
    pub restrictions: Vec<u64>,
    /// Name-type id -> string value.
    pub names: FxHashMap<u32, String>,
    height_profile: OnceCell<Vec<HeightSample>>,
}

impl RouteEdge {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            section: Weak::new(),
            points_x: Vec::new(),
            points_y: Vec::new(),
            types: Vec::new(),
            point_types: Vec::new(),
            point_name_types: Vec::new(),
            point_name_ids: Vec::new(),
            point_names: Vec::new(),
            restrictions: Vec::new(),
            names: FxHashMap::default(),
            height_profile: OnceCell::new(),
        }
    }

    /// Bind the edge to its owning routing section. Called by the traversal
    /// engine right after decode; also useful when building edges in tests.
    pub fn attach_section(&mut self, section: Weak<RoutingSection>) {
        self.section = section;
    }

    pub fn points_len(&self) -> usize {
        self.points_x.len()
    }

    /// Decoded (lon, lat) of point `k`.
    pub fn point(&self, k: usize) -> geo::Point {
        geom::point_from_31(self.points_x[k], self.points_y[k])
    }

    /// An arbitrary entry of the name table, or empty. No tie-break is defined
    /// among multiple names; callers needing determinism must sort.
    pub fn name(&self) -> String {
        self.names.values().next().cloned().unwrap_or_default()
    }

    /// Value of the first whole-edge attribute whose key equals `tag`, or
    /// empty. Linear scan; `types` holds tens of entries at most.
    pub fn value_of(&self, tag: &str) -> String {
        let Some(section) = self.section.upgrade() else {
            return String::new();
        };
        for &type_id in &self.types {
            if let Some(pair) = section.tags.get(type_id) {
                if pair.key == tag {
                    return pair.value.clone();
                }
            }
        }
        String::new()
    }

    /// Value of the `highway` tag, or empty.
    pub fn highway(&self) -> String {
        self.value_of("highway")
    }

    /// True when first and last points are coordinate-identical.
    pub fn is_loop(&self) -> bool {
        match (self.points_x.first(), self.points_x.last()) {
            (Some(fx), Some(lx)) => {
                fx == lx && self.points_y.first() == self.points_y.last()
            }
            _ => false,
        }
    }

    /// A roundabout is either tagged as one, or a oneway loop.
    pub fn is_roundabout(&self) -> bool {
        let Some(section) = self.section.upgrade() else {
            return false;
        };
        for &type_id in &self.types {
            let Some(pair) = section.tags.get(type_id) else {
                continue;
            };
            if pair.key == "roundabout" || pair.value == "roundabout" {
                return true;
            } else if pair.key == "oneway" && pair.value != "no" && self.is_loop() {
                return true;
            }
        }
        false
    }

    /// Insert a coordinate pair at `position`, shifting subsequent points.
    /// Per-point type data within bounds gets an empty set inserted so the
    /// parallel sequences stay in sync with the geometry.
    pub fn insert_point(&mut self, position: usize, x31: i32, y31: i32) {
        self.points_x.insert(position, x31);
        self.points_y.insert(position, y31);
        if self.point_types.len() > position {
            self.point_types.insert(position, PointTypeSet::new());
        }
    }

    pub fn restrictions_len(&self) -> usize {
        self.restrictions.len()
    }

    /// Restriction kind of entry `i` (low bits of the packed value).
    pub fn restriction_kind(&self, i: usize) -> Option<u8> {
        self.restrictions.get(i).map(|r| (r & RESTRICTION_MASK) as u8)
    }

    /// Target edge id of restriction entry `i`.
    pub fn restriction_target(&self, i: usize) -> Option<i64> {
        self.restrictions.get(i).map(|r| (r >> RESTRICTION_SHIFT) as i64)
    }

    /// Heading of the route at `start` walking `forward`, using the default
    /// 5-meter lookahead.
    pub fn heading(&self, start: usize, forward: bool) -> f64 {
        self.heading_with_min_distance(start, forward, 5.0)
    }

    /// Bearing east of north in `(-PI, PI]`, from the point reached after
    /// accumulating roughly `min_distance` meters back to the start point.
    ///
    /// Distance is a fixed small-angle approximation over raw fixed-point
    /// deltas (x scaled by 0.011, y by 0.01863), not full geodesy.
    pub fn heading_with_min_distance(&self, start: usize, forward: bool, min_distance: f64) -> f64 {
        if start >= self.points_len() {
            return 0.0;
        }
        let x = self.points_x[start] as f64;
        let y = self.points_y[start] as f64;
        let mut px = x;
        let mut py = y;
        let mut i = start;
        let mut total = 0.0;
        loop {
            if forward {
                i += 1;
                if i >= self.points_len() {
                    break;
                }
            } else {
                if i == 0 {
                    break;
                }
                i -= 1;
            }
            px = self.points_x[i] as f64;
            py = self.points_y[i] as f64;
            total += (px - x).abs() * 0.011 + (py - y).abs() * 0.01863;
            if total >= min_distance {
                break;
            }
        }
        -(x - px).atan2(y - py)
    }

    /// Lazily computed `(segment_distance, elevation)` pairs, one per point,
    /// first entry `(0, start_elevation)`. Empty when the edge carries no
    /// `osmand_ele_start` attribute.
    pub fn height_profile(&self) -> &[HeightSample] {
        self.height_profile
            .get_or_init(|| self.compute_height_profile())
    }

    fn compute_height_profile(&self) -> Vec<HeightSample> {
        let start_text = self.value_of("osmand_ele_start");
        if start_text.is_empty() {
            return Vec::new();
        }
        // Elevations in the container are whole meters.
        let start_height = lenient_float(&start_text).trunc();
        let end_text = self.value_of("osmand_ele_end");
        let end_height = if end_text.is_empty() {
            start_height
        } else {
            lenient_float(&end_text).trunc()
        };

        let n = self.points_len();
        if n == 0 {
            return Vec::new();
        }
        let section = self.section.upgrade();

        let mut profile = vec![(0.0, HEIGHT_UNDEFINED); n];
        profile[0] = (0.0, start_height);

        let mut prev_height = start_height;
        let mut prev = self.point(0);
        for k in 1..n {
            let cur = self.point(k);
            let dd = geom::haversine_distance(prev.y(), prev.x(), cur.y(), cur.x());

            let mut height = HEIGHT_UNDEFINED;
            if k == n - 1 {
                height = end_height;
            } else if let (Some(section), Some(point_types)) =
                (section.as_ref(), self.point_types.get(k))
            {
                for &type_id in point_types {
                    let Some(pair) = section.tags.get(type_id) else {
                        continue;
                    };
                    if pair.key == "osmand_ele_asc" {
                        height = prev_height + lenient_float(&pair.value);
                        break;
                    } else if pair.key == "osmand_ele_desc" {
                        height = prev_height - lenient_float(&pair.value);
                        break;
                    }
                }
            }
            profile[k] = (dd, height);

            if height != HEIGHT_UNDEFINED {
                // Interpolate the preceding run of undefined samples linearly,
                // proportional to accumulated segment distance.
                let mut total_distance = dd;
                let mut first_undefined = k;
                while first_undefined >= 1 && profile[first_undefined - 1].1 == HEIGHT_UNDEFINED {
                    first_undefined -= 1;
                    total_distance += profile[first_undefined].0;
                }
                if total_distance > 0.0 {
                    let slope = (height - prev_height) / total_distance;
                    for j in first_undefined..k {
                        profile[j].1 = profile[j].0 * slope + profile[j - 1].1;
                    }
                }
                prev_height = height;
            }

            prev = cur;
        }
        profile
    }
}

/// End of the leading numeric prefix (optional sign, digits, at most one dot),
/// or `None` when the text does not start with a number.
fn leading_number_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'-'));
    let mut seen_digit = false;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        i += 1;
    }
    seen_digit.then_some(i)
}

/// Leading numeric prefix and the remaining suffix.
fn leading_number(text: &str) -> Option<(f64, &str)> {
    let end = leading_number_end(text)?;
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

/// `atof`-style leniency: leading number or 0.
fn lenient_float(text: &str) -> f64 {
    leading_number(text).map(|(v, _)| v).unwrap_or(0.0)
}

/// Parse a free-text speed attribute into m/s.
///
/// `"none"` maps to a fixed cap of 40 in the engine's working unit without
/// the km/h conversion, and the mph factor of 1.6 applies after the km/h
/// division; both are preserved as observed in shipped data.
pub fn parse_speed(text: &str, default: f64) -> f64 {
    if text == "none" {
        return SPEED_NONE_CAP;
    }
    match leading_number(text) {
        Some((value, _)) => {
            let mut speed = value / 3.6; // km/h -> m/s
            if text.contains("mph") {
                speed *= 1.6;
            }
            speed
        }
        None => default,
    }
}

/// Parse a free-text length attribute into meters.
///
/// Handles compound feet-and-inches notation (`14'10"`) by recursively
/// parsing the second numeric run as an additional length.
pub fn parse_length(text: &str, default: f64) -> f64 {
    let Some((value, suffix)) = leading_number(text) else {
        return default;
    };

    let mut unit = suffix;
    let mut extra = 0.0;
    if let Some(pos) = suffix.find(|c: char| c.is_ascii_digit() || c == '.' || c == '-') {
        if leading_number(&suffix[pos..]).is_some() {
            extra = parse_length(&suffix[pos..], 0.0);
            unit = &suffix[..pos];
        }
    }

    let factor = if unit.contains("km") {
        1000.0
    } else if unit.contains("in") || unit.contains('"') {
        0.0254
    } else if unit.contains('\'') || unit.contains("ft") || unit.contains("feet") {
        0.3048
    } else if unit.contains("cm") {
        0.01
    } else if unit.contains("mile") {
        1609.34
    } else {
        1.0
    };

    value * factor + extra
}

/// Parse a free-text weight attribute into metric tons. Pound notations
/// (`"` or `lbs`) convert through kilograms.
pub fn parse_weight_in_ton(text: &str, default: f64) -> f64 {
    match leading_number(text) {
        Some((value, _)) => {
            if text.contains('"') || text.contains("lbs") {
                (value * 0.4535) / 1000.0
            } else {
                value
            }
        }
        None => default,
    }
}
