//! # Core Module
//!
//! Configuration shared by every rendering subsystem.

pub mod config;

pub use config::{
    sample_count_flags,
    ColorSpace,
    Config,
    ConfigError,
    PresentMode,
    RendererConfig,
    ShaderConfig,
};
