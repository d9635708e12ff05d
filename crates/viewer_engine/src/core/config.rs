//! # Renderer Configuration
//!
//! Settings consumed by the rendering core at construction time and the
//! runtime-switchable options (present mode, colour space, MSAA).
//!
//! All types are serializable so that a host application can persist them
//! through the [`Config`] trait.

use std::path::{Path, PathBuf};

use ash::vk;
use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Presentation mode requested from the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PresentMode {
    /// Vsync, always available
    #[default]
    Fifo,
    /// Vsync that tears when a frame is late
    FifoRelaxed,
    /// Triple-buffered, replaces queued images
    Mailbox,
    /// No vsync
    Immediate,
}

impl PresentMode {
    /// Vulkan equivalent
    pub const fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Colour space of the presented images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// sRGB-encoded swapchain format, hardware gamma on write
    #[default]
    Srgb,
    /// UNORM swapchain format, values written as-is
    Linear,
}

/// Shader lookup configuration
///
/// Compiled SPIR-V files are named `<id>.<stage>.spv` by the build script;
/// the directories are searched in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Directories searched for compiled shaders
    pub search_dirs: Vec<String>,
}

impl ShaderConfig {
    /// Search the given directories only
    pub fn new(search_dirs: Vec<String>) -> Self {
        Self { search_dirs }
    }

    /// Find a compiled shader file in the first directory that contains it
    pub fn locate(&self, file_name: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| Path::new(dir).join(file_name))
            .find(|path| path.exists())
    }

    /// Vertex and fragment SPIR-V paths for a shader id
    pub fn pair(&self, id: &str) -> Result<(PathBuf, PathBuf), String> {
        let vert = format!("{id}.vert.spv");
        let frag = format!("{id}.frag.spv");
        let vert_path = self.locate(&vert).ok_or_else(|| format!("Vertex shader not found: {vert}"))?;
        let frag_path = self.locate(&frag).ok_or_else(|| format!("Fragment shader not found: {frag}"))?;
        Ok((vert_path, frag_path))
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new(
            ["target/shaders/", "shaders/", "resources/shaders/", "../target/shaders/", "./"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }
}

/// Rendering core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Frames the CPU may record ahead of the GPU
    pub buffering: usize,
    /// Initial present mode
    pub present_mode: PresentMode,
    /// Initial colour space
    pub color_space: ColorSpace,
    /// MSAA sample count (1 disables multisampling)
    pub msaa_samples: u32,
    /// Validation layers; `None` enables them in debug builds
    pub enable_validation: Option<bool>,
    /// Colour the render target is cleared to
    pub clear_color: [f32; 4],
    /// Shader lookup
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Defaults for the named application
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            buffering: 2,
            present_mode: PresentMode::Fifo,
            color_space: ColorSpace::Srgb,
            msaa_samples: 4,
            enable_validation: None,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            shaders: ShaderConfig::default(),
        }
    }

    pub fn with_buffering(mut self, frames: usize) -> Self {
        self.buffering = frames;
        self
    }

    pub fn with_present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_msaa(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Requested sample count as a Vulkan flag
    pub fn sample_count(&self) -> Option<vk::SampleCountFlags> {
        sample_count_flags(self.msaa_samples)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.buffering == 0 {
            return Err("Buffering depth must be at least 1".to_string());
        }

        if self.buffering > 8 {
            return Err("Buffering depth should not exceed 8".to_string());
        }

        if self.sample_count().is_none() {
            return Err(format!("Unsupported MSAA sample count: {}", self.msaa_samples));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Scene Viewer")
    }
}

impl Config for RendererConfig {}

/// Map a sample count to its Vulkan flag, `None` for unsupported counts
pub const fn sample_count_flags(samples: u32) -> Option<vk::SampleCountFlags> {
    match samples {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffering, 2);
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.color_space, ColorSpace::Srgb);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(RendererConfig::new("").validate().is_err());
        assert!(RendererConfig::default().with_buffering(0).validate().is_err());
        assert!(RendererConfig::default().with_buffering(9).validate().is_err());
        assert!(RendererConfig::default().with_msaa(3).validate().is_err());
    }

    #[test]
    fn test_sample_count_mapping() {
        assert_eq!(sample_count_flags(1), Some(vk::SampleCountFlags::TYPE_1));
        assert_eq!(sample_count_flags(8), Some(vk::SampleCountFlags::TYPE_8));
        assert_eq!(sample_count_flags(16), None);
    }

    #[test]
    fn test_present_mode_to_vk() {
        assert_eq!(PresentMode::default().to_vk(), vk::PresentModeKHR::FIFO);
        assert_eq!(PresentMode::Mailbox.to_vk(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_shader_pair_missing() {
        let shaders = ShaderConfig::new(vec!["/nonexistent/".into()]);
        assert!(shaders.pair("default").is_err());
    }
}
