use std::path::PathBuf;

use serde::Deserialize;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default CLI port of the managed daemon
    pub port: Option<u16>,
}

impl Config {
    /// Load config from the default location (~/.config/telq/config.toml)
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| std::fs::read_to_string(&path).ok())
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("telq/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_from_toml() {
        let config: Config = toml::from_str("port = 7023").unwrap();
        assert_eq!(config.port, Some(7023));
    }

    #[test]
    fn empty_config_has_no_port() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.port, None);
    }
}
