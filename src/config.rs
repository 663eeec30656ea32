use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{RelayError, Result};

pub struct ConfigManager {
    settings: Settings,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let settings = Self::load_config()?;
        Ok(Self { settings })
    }

    fn find_config_file() -> Option<PathBuf> {
        let possible_paths = [
            std::env::var("XRELAY_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("conf.yaml")),
            Some(PathBuf::from("config/conf.yaml")),
            Some(PathBuf::from("/etc/xrelay/conf.yaml")),
        ];

        for path in possible_paths.iter().flatten() {
            if path.exists() {
                log::info!("Using config file: {}", path.display());
                return Some(path.clone());
            }
        }
        None
    }

    fn load_config() -> Result<Settings> {
        let mut config = Config::builder();

        if let Some(config_path) = Self::find_config_file() {
            config = config.add_source(File::from(config_path.as_ref()));
        } else {
            log::warn!("No config file found, using defaults and environment variables only");
        }

        config = config.add_source(Environment::with_prefix("XRELAY").separator("_"));

        config = config
            .set_default("http.port", 8080)?
            .set_default("common.debug", false)?
            .set_default("common.log.level", "info")?
            .set_default("common.log.file_path", "stdout")?
            .set_default("common.log.max_size", 100)?
            .set_default("common.log.max_backups", 7)?
            .set_default("live.hlsPort", 0)?
            .set_default("live.flvPort", 0)?
            .set_default("live.rtmpPort", 0)?
            .set_default("live.cameraPort", 0)?
            .set_default("live.hls_buffer", 3)?
            .set_default("live.camera_gop_max", 150)?;

        let config = config.build()?;
        config.try_deserialize().map_err(|e| RelayError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
    }

    pub fn get_settings(&self) -> &Settings {
        &self.settings
    }
}

pub fn get_setting() -> Settings {
    match ConfigManager::new() {
        Ok(manager) => manager.settings,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            Settings::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub http: Http,
    pub common: Common,
    pub live: Live,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: Http::default(),
            common: Common::default(),
            live: Live::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Http {
    pub port: u16,
}

impl Default for Http {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Common {
    pub debug: bool,
    pub log: Log,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// debug, info, warn, error
    pub level: String,
    /// "stdout" or a file path; files roll daily and by size
    pub file_path: String,
    /// roll size in MiB
    pub max_size: u64,
    /// rolled files kept per day
    pub max_backups: usize,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: "stdout".to_string(),
            max_size: 100,
            max_backups: 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Live {
    #[serde(rename = "hlsPort", alias = "hlsport")]
    pub hls_port: u16,
    #[serde(rename = "flvPort", alias = "flvport")]
    pub flv_port: u16,
    #[serde(rename = "rtmpPort", alias = "rtmpport")]
    pub rtmp_port: u16,
    #[serde(rename = "cameraPort", alias = "cameraport")]
    pub camera_port: u16,
    /// HLS sliding-window capacity, in segments
    pub hls_buffer: usize,
    /// camera GOP cache cap, in packets
    pub camera_gop_max: usize,
    /// channels to bring up at startup
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for Live {
    fn default() -> Self {
        Self {
            hls_port: 0,
            flv_port: 0,
            rtmp_port: 0,
            camera_port: 0,
            hls_buffer: 3,
            camera_gop_max: 150,
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Flv,
    Hls,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub key: String,
    pub kind: ChannelKind,
    pub upstream: String,
    /// HLS only: preferred variant label, empty picks highest bandwidth
    #[serde(default)]
    pub variant: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.http.port, 8080);
        assert_eq!(settings.common.log.level, "info");
        assert_eq!(settings.common.log.file_path, "stdout");
        assert_eq!(settings.live.hls_buffer, 3);
        assert_eq!(settings.live.camera_gop_max, 150);
        assert!(settings.live.channels.is_empty());
    }

    #[test]
    fn channel_config_deserializes_from_yaml_shape() {
        let yaml = r#"
key: test-hls
kind: hls
upstream: "http://origin.example/master.m3u8"
variant: "720"
"#;
        let ch: ChannelConfig = serde_yaml_like(yaml);
        assert_eq!(ch.key, "test-hls");
        assert_eq!(ch.kind, ChannelKind::Hls);
        assert_eq!(ch.variant, "720");
    }

    // config's File source handles YAML in production; tests go through
    // the same serde path via JSON to avoid a yaml dev-dependency.
    fn serde_yaml_like(yaml: &str) -> ChannelConfig {
        let mut map = serde_json::Map::new();
        for line in yaml.lines() {
            if let Some((k, v)) = line.split_once(':') {
                let v = v.trim().trim_matches('"');
                if !k.trim().is_empty() && !v.is_empty() {
                    map.insert(k.trim().into(), serde_json::Value::String(v.into()));
                }
            }
        }
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }
}
