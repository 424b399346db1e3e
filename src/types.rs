//! Shared primitive types and reader configuration.

use serde::de::Error;
use serde::{Deserialize, Serialize};

/// A byte region inside the container file: absolute offset plus length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegion {
    pub offset: u64,
    pub length: u32,
}

impl FileRegion {
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// A region with no bytes behind it.
    pub fn empty() -> Self {
        Self {
            offset: 0,
            length: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Axis-aligned bounding box in 31-bit fixed-point world coordinates.
///
/// `top` is the smaller y value (world y grows southward in this projection),
/// so containment and overlap read as `top <= bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox31 {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl BBox31 {
    pub fn new(left: i32, right: i32, top: i32, bottom: i32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    /// Closed-interval rectangle overlap test. Touching edges count as
    /// intersecting, matching the on-disk index contract.
    pub fn intersects(&self, other: &BBox31) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.top <= other.bottom
            && self.bottom >= other.top
    }

    /// True if `other` lies entirely inside `self` (closed intervals).
    pub fn contains(&self, other: &BBox31) -> bool {
        self.left <= other.left
            && self.right >= other.right
            && self.top <= other.top
            && self.bottom >= other.bottom
    }
}

/// Reader configuration.
///
/// Designed to be easily serializable and loadable from JSON while keeping
/// complexity minimal.
///
/// # Example
///
/// ```rust
/// use obfread::Config;
///
/// let config = Config::default();
///
/// let json = r#"{ "strict_decode": true }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert!(config.strict_decode);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// When set, a corrupt or unreadable subtree fails the whole query instead
    /// of being skipped with a warning.
    #[serde(default)]
    pub strict_decode: bool,

    /// Upper bound accepted for any file-region length before a read is
    /// attempted. Guards against allocating for a corrupt length field.
    #[serde(default = "Config::default_max_region_len")]
    pub max_region_len: u32,
}

impl Config {
    const fn default_max_region_len() -> u32 {
        32 * 1024 * 1024
    }

    pub fn with_strict_decode(mut self, strict: bool) -> Self {
        self.strict_decode = strict;
        self
    }

    pub fn with_max_region_len(mut self, max: u32) -> Self {
        assert!(max > 0, "Max region length must be greater than zero");
        self.max_region_len = max;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_region_len == 0 {
            return Err("Max region length must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_decode: false,
            max_region_len: Self::default_max_region_len(),
        }
    }
}
