use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MatteError, MatteResult};
use crate::math::DeviceOrientation;
use crate::types::{MatteResolution, TextureFormat};

/// Upper bound for `max_frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 64;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_frames_in_flight: usize,
    pub max_anchor_instances: usize,
    pub matte_resolution: MatteResolution,
    pub vertex_entry: String,
    pub fragment_entry: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 3,
            max_anchor_instances: 64,
            matte_resolution: MatteResolution::Half,
            vertex_entry: "composite_vertex".to_string(),
            fragment_entry: "composite_fragment".to_string(),
        }
    }
}

/// Formats the compositor configures on its render target at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub sample_count: u32,
    /// Headless output width.
    pub width: u32,
    /// Headless output height.
    pub height: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            color_format: TextureFormat::Bgra8Unorm,
            depth_format: TextureFormat::Depth32Float,
            sample_count: 1,
            width: 720,
            height: 1280,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayerConfig {
    pub front: Option<PathBuf>,
    pub back: Option<PathBuf>,
    /// Normalized back-layer distance in [0, 1].
    pub back_layer_distance: f32,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            front: None,
            back: None,
            back_layer_distance: 0.5,
        }
    }
}

/// Settings for the synthetic camera used by headless runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub orientation: DeviceOrientation,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            orientation: DeviceOrientation::Portrait,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MatteConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub layers: LayerConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

impl MatteConfig {
    pub fn load_from_file(path: &std::path::Path) -> MatteResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MatteConfig = toml::from_str(&contents)
            .map_err(|e| MatteError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> MatteResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| MatteError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> MatteResult<()> {
        let in_flight = self.pipeline.max_frames_in_flight;
        if in_flight == 0 || in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(MatteError::Config(format!(
                "max_frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, in_flight
            )));
        }
        if self.pipeline.max_anchor_instances == 0 {
            return Err(MatteError::Config(
                "max_anchor_instances must be at least 1".into(),
            ));
        }
        if self.target.sample_count != 1 {
            return Err(MatteError::Config(format!(
                "multisampling is not supported (sample_count = {})",
                self.target.sample_count
            )));
        }
        if self.target.color_format.is_depth() || !self.target.depth_format.is_depth() {
            return Err(MatteError::Config(format!(
                "invalid target formats: color {}, depth {}",
                self.target.color_format, self.target.depth_format
            )));
        }
        if self.target.width == 0 || self.target.height == 0 {
            return Err(MatteError::Config("target size must be non-zero".into()));
        }
        let distance = self.layers.back_layer_distance;
        if !(0.0..=1.0).contains(&distance) {
            return Err(MatteError::Config(format!(
                "back_layer_distance must be in [0, 1], got {}",
                distance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MatteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.max_frames_in_flight, 3);
        assert_eq!(config.pipeline.max_anchor_instances, 64);
        assert_eq!(config.target.color_format, TextureFormat::Bgra8Unorm);
        assert_eq!(config.target.depth_format, TextureFormat::Depth32Float);
        assert_eq!(config.target.sample_count, 1);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MatteConfig = toml::from_str(
            r#"
[pipeline]
max_frames_in_flight = 2
matte_resolution = "full"

[layers]
back_layer_distance = 0.25
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.max_frames_in_flight, 2);
        assert_eq!(config.pipeline.matte_resolution, MatteResolution::Full);
        assert_eq!(config.pipeline.fragment_entry, "composite_fragment");
        assert_eq!(config.layers.back_layer_distance, 0.25);
        assert_eq!(config.source.orientation, DeviceOrientation::Portrait);
    }

    #[test]
    fn test_validate_rejects_zero_in_flight() {
        let mut config = MatteConfig::default();
        config.pipeline.max_frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(MatteError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_multisampling() {
        let mut config = MatteConfig::default();
        config.target.sample_count = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_distance_out_of_range() {
        let mut config = MatteConfig::default();
        config.layers.back_layer_distance = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("matte-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("matte.toml");

        let mut config = MatteConfig::default();
        config.target.width = 360;
        config.save_to_file(&path).unwrap();
        let loaded = MatteConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.target.width, 360);

        std::fs::remove_dir_all(&dir).ok();
    }
}
