use lodtile_map::MapConfig;
use lodtile_renderer::RenderConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::Error),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub map: MapConfig,
    pub render: RenderConfig,
}

impl Config {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;

        Self::from_ron_str(&text)
    }

    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::de::from_str(text)?)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use lodtile_map::core::arena::Growth;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_ron_str("(map: (max_levels: 4), render: (buffer_growth: Pow2))").unwrap();

        assert_eq!(config.map.max_levels, 4);
        assert_eq!(config.map.tile_pool_capacity, MapConfig::default().tile_pool_capacity);
        assert_eq!(config.render.buffer_growth, Growth::Pow2);
        assert!(config.render.per_level_storage);

        assert_eq!(Config::from_ron_str("()").unwrap(), Config::default());
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(
            Config::from_ron_str("(map: (max_levels: \"many\"))"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Config::read_file("/nonexistent/lodtile.ron"),
            Err(ConfigError::Io(_))
        ));
    }
}
