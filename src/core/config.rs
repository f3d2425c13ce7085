//! Engine configuration, loaded from JSON by the host application.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{LodError, Result};

/// Compression applied to meta file bodies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// No compression, body is the raw section archive
    Uncompressed,
    /// LZ4 frame format
    #[default]
    Lz4,
}

impl Compression {
    /// Tag stored in the meta file header
    pub fn tag(self) -> u8 {
        match self {
            Compression::Uncompressed => 0,
            Compression::Lz4 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::Uncompressed),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }
}

/// Configuration for the LOD engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Root directory for section files (one subdirectory per source kind)
    pub storage_dir: PathBuf,
    /// Body compression for newly written files
    pub compression: Compression,
    /// Radius around the viewer (blocks) in which sections are kept loaded
    pub render_distance: f64,
    /// Finest section detail level (4 = chunk sized)
    pub min_section_detail: u8,
    /// Coarsest section detail level, also the quad-tree root level
    pub max_section_detail: u8,
    /// Distance (blocks) covered by the finest detail band; each following band doubles
    pub lod_distance_unit: f64,
    /// Maximum number of section loads in flight
    pub max_concurrent_loads: usize,
    /// Lowest block y of the world
    pub level_min_y: i32,
    /// Total world height in blocks
    pub level_height: u32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("lod"),
            compression: Compression::Lz4,
            render_distance: 512.0,
            min_section_detail: 4,
            max_section_detail: 10,
            lod_distance_unit: 64.0,
            max_concurrent_loads: 8,
            level_min_y: -64,
            level_height: 384,
        }
    }
}

impl LodConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: LodConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.min_section_detail < crate::source::SECTION_DETAIL_OFFSET {
            return Err(LodError::Config(format!(
                "min_section_detail {} is below {}",
                self.min_section_detail,
                crate::source::SECTION_DETAIL_OFFSET
            )));
        }
        if self.max_section_detail < self.min_section_detail {
            return Err(LodError::Config(format!(
                "max_section_detail {} is below min_section_detail {}",
                self.max_section_detail, self.min_section_detail
            )));
        }
        if self.max_section_detail > crate::math::MAX_DETAIL {
            return Err(LodError::Config(format!(
                "max_section_detail {} exceeds {}",
                self.max_section_detail,
                crate::math::MAX_DETAIL
            )));
        }
        if !(self.render_distance > 0.0) || !(self.lod_distance_unit > 0.0) {
            return Err(LodError::Config("distances must be positive".into()));
        }
        if self.max_concurrent_loads == 0 {
            return Err(LodError::Config("max_concurrent_loads must be at least 1".into()));
        }
        if self.level_height == 0 || self.level_height > crate::column::MAX_Y {
            return Err(LodError::Config(format!(
                "level_height {} must be in 1..={}",
                self.level_height,
                crate::column::MAX_Y
            )));
        }
        Ok(())
    }
}
