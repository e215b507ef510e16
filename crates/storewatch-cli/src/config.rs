use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Built from defaults, then an optional TOML file, then `STOREWATCH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Haar cascade XML. Searched in the usual OpenCV locations when unset.
    pub cascade_path: Option<PathBuf>,
    /// Fingerprint similarity a match must exceed.
    pub match_threshold: f64,
    /// Delay between scans in `watch`.
    pub scan_interval_ms: u64,
    /// Frames dropped after opening the camera while exposure settles.
    pub warmup_frames: usize,
    /// Local image studio opened for exported purchase images.
    pub studio_url: String,
    pub gemini_endpoint: String,
    pub gemini_model: String,
    pub hf_endpoint: String,
    pub hf_model: String,
}

/// On-disk layout of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub db_path: Option<PathBuf>,
    pub cascade_path: Option<PathBuf>,
    pub match_threshold: Option<f64>,
    pub scan_interval_ms: Option<u64>,
    pub warmup_frames: Option<usize>,
    pub studio_url: Option<String>,
    pub gemini_endpoint: Option<String>,
    pub gemini_model: Option<String>,
    pub hf_endpoint: Option<String>,
    pub hf_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            db_path: data_dir().join("storewatch.db"),
            cascade_path: None,
            match_threshold: storewatch_core::DEFAULT_MATCH_THRESHOLD,
            scan_interval_ms: 500,
            warmup_frames: 4,
            studio_url: "http://127.0.0.1:7860/".to_string(),
            gemini_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            hf_endpoint: "https://api-inference.huggingface.co/models".to_string(),
            hf_model: "black-forest-labs/FLUX.1-dev".to_string(),
        }
    }
}

impl Config {
    /// Load configuration. `explicit` (from `--config`) wins over
    /// `STOREWATCH_CONFIG`, which wins over the XDG default location. Only an
    /// explicitly named file is required to exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("STOREWATCH_CONFIG").ok().map(PathBuf::from));

        let file = match named {
            Some(path) => Some(read_file(&path)?),
            None => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Some(read_file(&path)?)
                } else {
                    None
                }
            }
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Layer a parsed file and an environment lookup over the defaults.
    pub fn resolve(
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(f) = file {
            set(&mut cfg.camera_device, f.camera_device);
            set(&mut cfg.frame_width, f.frame_width);
            set(&mut cfg.frame_height, f.frame_height);
            set(&mut cfg.db_path, f.db_path);
            if f.cascade_path.is_some() {
                cfg.cascade_path = f.cascade_path;
            }
            set(&mut cfg.match_threshold, f.match_threshold);
            set(&mut cfg.scan_interval_ms, f.scan_interval_ms);
            set(&mut cfg.warmup_frames, f.warmup_frames);
            set(&mut cfg.studio_url, f.studio_url);
            set(&mut cfg.gemini_endpoint, f.gemini_endpoint);
            set(&mut cfg.gemini_model, f.gemini_model);
            set(&mut cfg.hf_endpoint, f.hf_endpoint);
            set(&mut cfg.hf_model, f.hf_model);
        }

        set(&mut cfg.camera_device, env("STOREWATCH_CAMERA_DEVICE"));
        set(&mut cfg.frame_width, env_parse(&env, "STOREWATCH_FRAME_WIDTH"));
        set(&mut cfg.frame_height, env_parse(&env, "STOREWATCH_FRAME_HEIGHT"));
        set(&mut cfg.db_path, env("STOREWATCH_DB_PATH").map(PathBuf::from));
        if let Some(p) = env("STOREWATCH_CASCADE_PATH") {
            cfg.cascade_path = Some(PathBuf::from(p));
        }
        set(&mut cfg.match_threshold, env_parse(&env, "STOREWATCH_MATCH_THRESHOLD"));
        set(&mut cfg.scan_interval_ms, env_parse(&env, "STOREWATCH_SCAN_INTERVAL_MS"));
        set(&mut cfg.warmup_frames, env_parse(&env, "STOREWATCH_WARMUP_FRAMES"));
        set(&mut cfg.studio_url, env("STOREWATCH_STUDIO_URL"));
        set(&mut cfg.gemini_endpoint, env("STOREWATCH_GEMINI_ENDPOINT"));
        set(&mut cfg.gemini_model, env("STOREWATCH_GEMINI_MODEL"));
        set(&mut cfg.hf_endpoint, env("STOREWATCH_HF_ENDPOINT"));
        set(&mut cfg.hf_model, env("STOREWATCH_HF_MODEL"));

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.match_threshold) {
            return Err(ConfigError::Invalid(format!(
                "match_threshold {} is outside [-1, 1]",
                self.match_threshold
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::Invalid("frame size must be non-zero".into()));
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid("scan_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(parsed)
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Parse an environment value, ignoring (with a warning) ones that don't parse.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("storewatch")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("storewatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(None, env_of(&[])).unwrap();
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!((cfg.frame_width, cfg.frame_height), (640, 480));
        assert_eq!(cfg.match_threshold, 0.85);
        assert_eq!(cfg.studio_url, "http://127.0.0.1:7860/");
        assert!(cfg.db_path.ends_with("storewatch/storewatch.db"));
    }

    #[test]
    fn test_file_then_env() {
        let file: FileConfig = toml::from_str(
            r#"
            camera_device = "/dev/video4"
            match_threshold = 0.9
            cascade_path = "/opt/haar.xml"
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(
            Some(file),
            env_of(&[
                ("STOREWATCH_MATCH_THRESHOLD", "0.7"),
                ("STOREWATCH_SCAN_INTERVAL_MS", "250"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.camera_device, "/dev/video4");
        assert_eq!(cfg.match_threshold, 0.7);
        assert_eq!(cfg.scan_interval_ms, 250);
        assert_eq!(cfg.cascade_path, Some(PathBuf::from("/opt/haar.xml")));
    }

    #[test]
    fn test_studio_services_from_env() {
        let file: FileConfig = toml::from_str(r#"gemini_model = "gemini-pro-vision""#).unwrap();
        let cfg = Config::resolve(
            Some(file),
            env_of(&[
                ("STOREWATCH_GEMINI_ENDPOINT", "http://localhost:9000/v1"),
                ("STOREWATCH_GEMINI_MODEL", "gemini-2.0-flash"),
                ("STOREWATCH_HF_ENDPOINT", "http://localhost:9001/models"),
                ("STOREWATCH_HF_MODEL", "stabilityai/sdxl"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.gemini_endpoint, "http://localhost:9000/v1");
        assert_eq!(cfg.gemini_model, "gemini-2.0-flash");
        assert_eq!(cfg.hf_endpoint, "http://localhost:9001/models");
        assert_eq!(cfg.hf_model, "stabilityai/sdxl");
    }

    #[test]
    fn test_bad_env_value_is_ignored() {
        let cfg = Config::resolve(None, env_of(&[("STOREWATCH_WARMUP_FRAMES", "lots")])).unwrap();
        assert_eq!(cfg.warmup_frames, 4);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = Config::resolve(None, env_of(&[("STOREWATCH_MATCH_THRESHOLD", "1.5")]));
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "camera = \"/dev/video1\"\n").unwrap();
        assert!(matches!(
            Config::load(Some(path.as_path())),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::load(Some(dir.path().join("missing.toml").as_path())),
            Err(ConfigError::Read { .. })
        ));
    }
}
