use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_REGION_NAME: &str = "detection_relay";
const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_TARGET_CLASS: usize = 0;
const DEFAULT_INPUT_SIZE: u32 = 416;
const DEFAULT_FRAME_DELAY_MS: u64 = 30;
const DEFAULT_PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    region: Option<RegionConfigFile>,
    filter: Option<FilterConfigFile>,
    inference: Option<InferenceConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RegionConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    conf_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    target_class: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    frame_delay_ms: Option<u64>,
    progress_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub region: RegionSettings,
    pub filter: FilterSettings,
    pub inference: InferenceSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionSettings {
    /// Backing object of the shared region.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    pub target_class: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Stub,
    Tract,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub backend: BackendKind,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Pause after each published frame so pollers can keep up.
    pub frame_delay: Duration,
    /// Log an info-level progress line every N frames (0 disables).
    pub progress_every: u64,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            path: default_region_path(),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            target_class: DEFAULT_TARGET_CLASS,
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            model_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            frame_delay: Duration::from_millis(DEFAULT_FRAME_DELAY_MS),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown inference backend '{}'", other)),
        }
    }
}

/// Default location of the shared region: tmpfs-backed on Linux, the temp dir elsewhere.
pub fn default_region_path() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.join(DEFAULT_REGION_NAME)
    } else {
        std::env::temp_dir().join(DEFAULT_REGION_NAME)
    }
}

impl DetectorConfig {
    /// Load configuration: optional file (explicit path or `DETECTOR_CONFIG`), then
    /// `DETECTOR_*` environment overrides, then validation.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("DETECTOR_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Self {
        let region = RegionSettings {
            path: file
                .region
                .and_then(|region| region.path)
                .unwrap_or_else(default_region_path),
        };
        let filter_file = file.filter.unwrap_or_default();
        let filter = FilterSettings {
            conf_threshold: filter_file
                .conf_threshold
                .unwrap_or(DEFAULT_CONF_THRESHOLD),
            nms_threshold: filter_file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            target_class: filter_file.target_class.unwrap_or(DEFAULT_TARGET_CLASS),
        };
        let inference_file = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            backend: inference_file.backend.unwrap_or(BackendKind::Stub),
            model_path: inference_file.model_path,
            input_width: inference_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: inference_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
        };
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            frame_delay: Duration::from_millis(
                stream_file.frame_delay_ms.unwrap_or(DEFAULT_FRAME_DELAY_MS),
            ),
            progress_every: stream_file.progress_every.unwrap_or(DEFAULT_PROGRESS_EVERY),
        };
        Self {
            region,
            filter,
            inference,
            stream,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("DETECTOR_REGION_PATH") {
            self.region.path = PathBuf::from(path);
        }
        if let Some(value) = env_nonempty("DETECTOR_CONF_THRESHOLD") {
            self.filter.conf_threshold = value
                .parse()
                .map_err(|_| anyhow!("DETECTOR_CONF_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_nonempty("DETECTOR_NMS_THRESHOLD") {
            self.filter.nms_threshold = value
                .parse()
                .map_err(|_| anyhow!("DETECTOR_NMS_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_nonempty("DETECTOR_BACKEND") {
            self.inference.backend = value.parse()?;
        }
        if let Some(path) = env_nonempty("DETECTOR_MODEL_PATH") {
            self.inference.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_nonempty("DETECTOR_FRAME_DELAY_MS") {
            let millis: u64 = value.parse().map_err(|_| {
                anyhow!("DETECTOR_FRAME_DELAY_MS must be an integer number of milliseconds")
            })?;
            self.stream.frame_delay = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.region.path.as_os_str().is_empty() {
            return Err(anyhow!("region path must not be empty"));
        }
        for (name, value) in [
            ("conf_threshold", self.filter.conf_threshold),
            ("nms_threshold", self.filter.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.inference.input_width == 0 || self.inference.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.inference.backend == BackendKind::Tract && self.inference.model_path.is_none() {
            return Err(anyhow!("tract backend requires a model path"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
