//! Viewer configuration
//!
//! Settings that shape the decode pipeline: how many pages stay resident,
//! when tiles subdivide, memory limits and page preprocessing. Configuration
//! can be created programmatically, loaded from a JSON file, or read from
//! environment variables.

use crate::error::ConfigError;
use crate::view_state::DecodeMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest allowed slice limit, one bitmap cell
pub const MIN_SLICE_LIMIT: u32 = 128;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Pages kept decoded around the current page (half on each side)
    pub pages_in_memory: usize,

    /// Tile subdivision policy
    pub decode_mode: DecodeMode,

    /// Largest projected tile edge in pixels before subdividing (Normal mode)
    pub slice_limit: u32,

    /// Largest tile bitmap in bytes before subdividing (LowMemory mode)
    pub max_image_size: u64,

    /// Zoom above which the root node subdivides; squared for each level
    pub root_zoom_threshold: f32,

    /// Detect and trim page margins after the first decode
    pub crop_pages: bool,

    /// Show landscape pages as two view pages
    pub split_pages: bool,

    /// Invert page colours
    pub night_mode: bool,

    /// Byte budget for pooled tile buffers in megabytes; 0 means unbounded
    pub pool_budget_mb: usize,

    /// Decoder pages kept open by the decode thread
    pub codec_page_cache: usize,

    /// Where page sizes are persisted; `None` disables the cache
    pub page_cache_dir: Option<PathBuf>,

    pub min_zoom: f32,
    pub max_zoom: f32,

    /// Factor applied by the zoom in and zoom out actions
    pub zoom_step: f32,

    /// Vertical gap between pages in the continuous layout, in pixels
    pub page_gap: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            pages_in_memory: 2,
            decode_mode: DecodeMode::Normal,
            slice_limit: 2048,
            max_image_size: 4 * 1024 * 1024,
            root_zoom_threshold: 2.0,
            crop_pages: false,
            split_pages: false,
            night_mode: false,
            pool_budget_mb: 256,
            codec_page_cache: docview_cache::DEFAULT_PAGE_CAPACITY,
            page_cache_dir: Some(Self::default_page_cache_dir()),
            min_zoom: 1.0,
            max_zoom: 8.0,
            zoom_step: 1.25,
            page_gap: 8.0,
        }
    }
}

impl ViewerConfig {
    /// Platform cache directory for page sizes
    ///
    /// - macOS: ~/Library/Caches/docview/pages
    /// - Linux: ~/.cache/docview/pages
    /// - Windows: %LOCALAPPDATA%\docview\pages
    pub fn default_page_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(dir) => dir.join("docview").join("pages"),
            None => PathBuf::from("cache/pages"),
        }
    }

    pub fn with_pages_in_memory(mut self, pages: usize) -> Self {
        self.pages_in_memory = pages;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn with_slice_limit(mut self, limit: u32) -> Self {
        self.slice_limit = limit;
        self
    }

    pub fn with_max_image_size(mut self, bytes: u64) -> Self {
        self.max_image_size = bytes;
        self
    }

    pub fn with_crop_pages(mut self, crop: bool) -> Self {
        self.crop_pages = crop;
        self
    }

    pub fn with_split_pages(mut self, split: bool) -> Self {
        self.split_pages = split;
        self
    }

    pub fn with_night_mode(mut self, night: bool) -> Self {
        self.night_mode = night;
        self
    }

    pub fn with_pool_budget_mb(mut self, mb: usize) -> Self {
        self.pool_budget_mb = mb;
        self
    }

    pub fn with_page_cache_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        self.page_cache_dir = dir.map(|d| d.as_ref().to_path_buf());
        self
    }

    /// Byte budget for the buffer pool, `None` when unbounded
    pub fn pool_budget_bytes(&self) -> Option<usize> {
        (self.pool_budget_mb > 0).then(|| self.pool_budget_mb * 1024 * 1024)
    }

    /// Loads configuration from environment variables on top of defaults.
    ///
    /// Environment variables:
    /// - `DOCVIEW_PAGES_IN_MEMORY`: pages kept around the current one
    /// - `DOCVIEW_DECODE_MODE`: `normal`, `native_resolution` or `low_memory`
    /// - `DOCVIEW_SLICE_LIMIT`: slice limit in pixels
    /// - `DOCVIEW_MAX_IMAGE_SIZE`: low-memory tile limit in bytes
    /// - `DOCVIEW_CROP_PAGES`, `DOCVIEW_SPLIT_PAGES`, `DOCVIEW_NIGHT_MODE`: booleans
    /// - `DOCVIEW_POOL_MB`: buffer pool budget in MB
    /// - `DOCVIEW_PAGE_CACHE_DIR`: page-size cache directory (empty disables)
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_value("DOCVIEW_PAGES_IN_MEMORY") {
            config.pages_in_memory = parse("DOCVIEW_PAGES_IN_MEMORY", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_DECODE_MODE") {
            config.decode_mode = value
                .parse()
                .map_err(|_| ConfigError::invalid("DOCVIEW_DECODE_MODE", &value))?;
        }
        if let Some(value) = env_value("DOCVIEW_SLICE_LIMIT") {
            config.slice_limit = parse("DOCVIEW_SLICE_LIMIT", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_MAX_IMAGE_SIZE") {
            config.max_image_size = parse("DOCVIEW_MAX_IMAGE_SIZE", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_CROP_PAGES") {
            config.crop_pages = parse_bool("DOCVIEW_CROP_PAGES", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_SPLIT_PAGES") {
            config.split_pages = parse_bool("DOCVIEW_SPLIT_PAGES", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_NIGHT_MODE") {
            config.night_mode = parse_bool("DOCVIEW_NIGHT_MODE", &value)?;
        }
        if let Some(value) = env_value("DOCVIEW_POOL_MB") {
            config.pool_budget_mb = parse("DOCVIEW_POOL_MB", &value)?;
        }
        if let Ok(value) = std::env::var("DOCVIEW_PAGE_CACHE_DIR") {
            config.page_cache_dir = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_limit < MIN_SLICE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "slice_limit must be at least {MIN_SLICE_LIMIT}, got {}",
                self.slice_limit
            )));
        }
        if !(self.root_zoom_threshold > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "root_zoom_threshold must be greater than 1, got {}",
                self.root_zoom_threshold
            )));
        }
        if !(self.min_zoom > 0.0 && self.min_zoom <= self.max_zoom) {
            return Err(ConfigError::Invalid(format!(
                "zoom range {}..{} is empty",
                self.min_zoom, self.max_zoom
            )));
        }
        if !(self.zoom_step > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "zoom_step must be greater than 1, got {}",
                self.zoom_step
            )));
        }
        if self.codec_page_cache == 0 {
            return Err(ConfigError::Invalid(
                "codec_page_cache must be at least 1".to_string(),
            ));
        }
        if self.max_image_size == 0 {
            return Err(ConfigError::Invalid(
                "max_image_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value)),
    }
}
