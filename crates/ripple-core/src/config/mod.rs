//! Engine configuration
//!
//! - Generic YAML config loading/saving
//! - Default config location
//! - `EngineConfig` with peak, worker, cache and spectrogram settings
//!
//! # Usage
//!
//! ```ignore
//! use ripple_core::config::{load_config, default_config_path, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{EngineConfig, KernelPreference, SpectrogramConfig, DEFAULT_CACHE_FILE_NAME};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
