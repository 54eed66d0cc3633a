//! Engine configuration
//!
//! Configuration is loaded from `FASTPOINTS_*` environment variables, falling
//! back to the defaults below for anything unset or unparsable.

use std::env;
use std::time::Duration;

use crate::layer::LodConfig;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Grid cell edge for layers that do not pick their own, projected units
    pub default_cell_size: f64,
    /// Level-of-detail thresholds for layers without overrides
    pub lod: LodConfig,
    /// Quiet period before a view extent is reported
    pub extent_debounce: Duration,
    /// Points per ingestion command when the bridge splits large batches
    pub ingest_chunk_size: usize,
    /// Click tolerance in CSS pixels
    pub pick_radius_px: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_cell_size: 1000.0,
            lod: LodConfig::default(),
            extent_debounce: Duration::from_millis(150),
            ingest_chunk_size: 50_000,
            pick_radius_px: 6.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Grid and LOD config
        if let Ok(val) = env::var("FASTPOINTS_DEFAULT_CELL_SIZE")
            && let Ok(v) = val.parse::<f64>()
            && v.is_finite()
            && v > 0.0
        {
            config.default_cell_size = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_GRID_CELL_THRESHOLD")
            && let Ok(v) = val.parse()
        {
            config.lod.grid_cell_threshold = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_GRID_SAMPLING_THRESHOLD")
            && let Ok(v) = val.parse()
        {
            config.lod.grid_sampling_threshold = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_GRID_SAMPLING_TARGET")
            && let Ok(v) = val.parse()
        {
            config.lod.grid_sampling_target = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_POINT_DECIMATION_PX")
            && let Ok(v) = val.parse()
        {
            config.lod.point_decimation_px = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_ELLIPSE_DECIMATION_THRESHOLD")
            && let Ok(v) = val.parse()
        {
            config.lod.ellipse_decimation_threshold = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_ELLIPSE_DECIMATION_TARGET")
            && let Ok(v) = val.parse()
        {
            config.lod.ellipse_decimation_target = v;
        }

        // View and interaction config
        if let Ok(val) = env::var("FASTPOINTS_EXTENT_DEBOUNCE_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.extent_debounce = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("FASTPOINTS_INGEST_CHUNK_SIZE")
            && let Ok(v) = val.parse::<usize>()
            && v > 0
        {
            config.ingest_chunk_size = v;
        }
        if let Ok(val) = env::var("FASTPOINTS_PICK_RADIUS_PX")
            && let Ok(v) = val.parse()
        {
            config.pick_radius_px = v;
        }

        config
    }
}
