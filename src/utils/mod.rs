//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities
//! - Image grid snapshots

mod checkpoint;
mod config;
mod snapshot;

pub use checkpoint::{
    find_latest_checkpoint, list_checkpoints, load_checkpoint, load_checkpoint_meta, save_checkpoint,
    CheckpointMeta, CheckpointPaths, METRICS_FILE,
};
pub use config::{ensure_config_exists, Config, DataConfig, DatasetKind, ModelConfig, TrainingConfigFile};
pub use snapshot::{image_grid, save_image_grid, GRID_COLUMNS, GRID_PADDING};
