//! Persistent viewer settings
//!
//! Stored as `viewer.toml` next to the working directory. Missing fields
//! fall back to their defaults so older files keep loading.

use serde::{Deserialize, Serialize};
use viewer_engine::core::config::{ColorSpace, Config, PresentMode, RendererConfig, ShaderConfig};

/// Default settings file
pub const SETTINGS_FILE: &str = "viewer.toml";

/// Last window placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(i32, i32)>,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            position: None,
        }
    }
}

/// Viewer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub msaa_samples: u32,
    pub present_mode: PresentMode,
    pub color_space: ColorSpace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<bool>,
    /// Most recent first
    pub recent_files: Vec<String>,
    pub shader_dirs: Vec<String>,
    pub window: WindowSettings,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            msaa_samples: 4,
            present_mode: PresentMode::Fifo,
            color_space: ColorSpace::Srgb,
            validation: None,
            recent_files: Vec::new(),
            shader_dirs: ShaderConfig::default().search_dirs,
            window: WindowSettings::default(),
        }
    }
}

impl Config for ViewerConfig {}

impl ViewerConfig {
    /// Length of the recent files list
    pub const MAX_RECENT: usize = 10;

    /// Move `path` to the front of the recent files list
    pub fn add_recent(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.recent_files.retain(|p| *p != path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(Self::MAX_RECENT);
    }

    /// Remember where the window was when the viewer closed
    pub fn remember_window(&mut self, size: (u32, u32), position: (i32, i32)) {
        if size.0 > 0 && size.1 > 0 {
            self.window.width = size.0;
            self.window.height = size.1;
        }
        self.window.position = Some(position);
    }

    /// Renderer configuration for these settings
    pub fn renderer_config(&self) -> RendererConfig {
        let mut config = RendererConfig::new("Scene Viewer")
            .with_present_mode(self.present_mode)
            .with_color_space(self.color_space)
            .with_msaa(self.msaa_samples)
            .with_shaders(ShaderConfig::new(self.shader_dirs.clone()));
        if let Some(enabled) = self.validation {
            config = config.with_validation(enabled);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(file: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("viewer_app_{}_{}", std::process::id(), file))
    }

    #[test]
    fn test_recent_files_bounded_and_deduplicated() {
        let mut config = ViewerConfig::default();
        for i in 0..12 {
            config.add_recent(format!("scene_{i}.png"));
        }
        assert_eq!(config.recent_files.len(), ViewerConfig::MAX_RECENT);
        assert_eq!(config.recent_files[0], "scene_11.png");

        config.add_recent("scene_5.png");
        assert_eq!(config.recent_files[0], "scene_5.png");
        assert_eq!(config.recent_files.iter().filter(|p| *p == "scene_5.png").count(), 1);
        assert_eq!(config.recent_files.len(), ViewerConfig::MAX_RECENT);
    }

    #[test]
    fn test_settings_roundtrip() {
        let mut config = ViewerConfig {
            msaa_samples: 8,
            present_mode: PresentMode::Mailbox,
            color_space: ColorSpace::Linear,
            ..ViewerConfig::default()
        };
        config.add_recent("textures/grid.png");
        config.remember_window((800, 600), (40, 30));

        let path = temp_path("settings.toml");
        config.save_to_file(&path).unwrap();
        let loaded = ViewerConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial.toml");
        std::fs::write(&path, "msaa_samples = 2\n").unwrap();
        let loaded = ViewerConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.msaa_samples, 2);
        assert_eq!(loaded.window, WindowSettings::default());
        assert!(loaded.recent_files.is_empty());
    }

    #[test]
    fn test_minimized_size_not_remembered() {
        let mut config = ViewerConfig::default();
        config.remember_window((0, 0), (5, 5));
        assert_eq!((config.window.width, config.window.height), (1280, 720));
        assert_eq!(config.window.position, Some((5, 5)));
    }

    #[test]
    fn test_renderer_config_mapping() {
        let config = ViewerConfig {
            msaa_samples: 1,
            validation: Some(false),
            ..ViewerConfig::default()
        };
        let renderer = config.renderer_config();
        assert_eq!(renderer.msaa_samples, 1);
        assert!(!renderer.validation_enabled());
        assert!(renderer.validate().is_ok());
        assert_eq!(renderer.shaders.search_dirs, config.shader_dirs);
    }
}
