use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Pause between answered frames on the detection socket (~20 FPS).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    /// Upstream text extraction + emotion analysis service.
    pub analyzer_url: Option<String>,
    /// Upstream object detection + depth service.
    pub detector_url: Option<String>,
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_start_view")]
    pub start_view: String,
    /// When set, the rendered overlay of every tick is written here as PNG.
    pub preview_path: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_facing")]
    pub facing: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// JPEG quality used when streaming frames to the detection socket.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookConfig {
    #[serde(default = "default_min_area")]
    pub min_area: f64,
    #[serde(default = "default_max_area_ratio")]
    pub max_area_ratio: f64,
    #[serde(default = "default_stable_threshold")]
    pub stable_threshold: u32,
    #[serde(default = "default_min_clarity")]
    pub min_clarity: f64,
    #[serde(default = "default_min_size_ratio")]
    pub min_size_ratio: f64,
    #[serde(default = "default_max_size_ratio")]
    pub max_size_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Local inference endpoint for the in-process obstacle view.
    pub model_url: Option<String>,
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_command")]
    pub command: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_base_wpm")]
    pub base_wpm: u32,
    #[serde(default = "default_speech_enabled")]
    pub enabled: bool,
    /// Offer voice commands on the home view.
    #[serde(default = "default_recognition")]
    pub recognition: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            frame_interval_ms: default_frame_interval_ms(),
            upload_dir: default_upload_dir(),
            analyzer_url: None,
            detector_url: None,
            depth_scale: default_depth_scale(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_url: default_ws_url(),
            start_view: default_start_view(),
            preview_path: None,
            debug: false,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: default_camera_url(),
            mode: default_mode(),
            width: default_width(),
            height: default_height(),
            facing: default_facing(),
            fps: default_fps(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            min_area: default_min_area(),
            max_area_ratio: default_max_area_ratio(),
            stable_threshold: default_stable_threshold(),
            min_clarity: default_min_clarity(),
            min_size_ratio: default_min_size_ratio(),
            max_size_ratio: default_max_size_ratio(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_url: None,
            allowlist: default_allowlist(),
            cooldown_secs: default_cooldown_secs(),
            min_score: default_min_score(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: default_speech_command(),
            voice: default_voice(),
            base_wpm: default_base_wpm(),
            enabled: default_speech_enabled(),
            recognition: default_recognition(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid("camera.fps must be positive".into()));
        }
        if !(1..=100).contains(&config.camera.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "camera.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if config.book.stable_threshold == 0 {
            return Err(ConfigError::Invalid(
                "book.stable_threshold must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:8000".into()
}
fn default_frame_interval_ms() -> u64 {
    50
}
fn default_upload_dir() -> String {
    "uploads".into()
}
fn default_depth_scale() -> f64 {
    0.05
}
fn default_api_base() -> String {
    "http://localhost:8000".into()
}
fn default_ws_url() -> String {
    "ws://localhost:8000/ws/detect-objects".into()
}
fn default_start_view() -> String {
    "home".into()
}
fn default_camera_url() -> String {
    "http://localhost:8080/stream".into()
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_facing() -> String {
    "environment".into()
}
fn default_fps() -> f64 {
    15.0
}
fn default_jpeg_quality() -> u8 {
    50
}
fn default_min_area() -> f64 {
    10_000.0
}
fn default_max_area_ratio() -> f64 {
    0.9
}
fn default_stable_threshold() -> u32 {
    15
}
fn default_min_clarity() -> f64 {
    20.0
}
fn default_min_size_ratio() -> f64 {
    0.3
}
fn default_max_size_ratio() -> f64 {
    0.9
}
fn default_allowlist() -> Vec<String> {
    [
        "person",
        "bicycle",
        "car",
        "motorcycle",
        "bus",
        "truck",
        "traffic light",
        "fire hydrant",
        "stop sign",
        "bench",
        "dog",
        "chair",
        "potted plant",
        "dining table",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_cooldown_secs() -> u64 {
    6
}
fn default_min_score() -> f64 {
    0.5
}
fn default_speech_command() -> String {
    "espeak-ng".into()
}
fn default_voice() -> String {
    "en-US".into()
}
fn default_base_wpm() -> u32 {
    175
}
fn default_speech_enabled() -> bool {
    true
}
fn default_recognition() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.server.frame_interval_ms, 50);
        assert_eq!(config.client.ws_url, "ws://localhost:8000/ws/detect-objects");
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.camera.facing, "environment");
        assert_eq!(config.book.stable_threshold, 15);
        assert_eq!(config.detection.cooldown_secs, 6);
        assert!(config.detection.allowlist.iter().any(|c| c == "person"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [client]
            api_base = "http://10.0.0.5:8000"
            debug = true

            [camera]
            mode = "polling"
            fps = 5.0

            [detection]
            allowlist = ["person", "dog"]
            "#,
        )
        .unwrap();
        assert_eq!(config.client.api_base, "http://10.0.0.5:8000");
        assert!(config.client.debug);
        assert_eq!(config.camera.mode, "polling");
        assert_eq!(config.camera.fps, 5.0);
        assert_eq!(config.detection.allowlist, vec!["person", "dog"]);
        // untouched keys in a present section still default
        assert_eq!(config.camera.jpeg_quality, 50);
    }

    #[test]
    fn rejects_zero_fps() {
        let err = Config::parse("[camera]\nfps = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            Config::parse("[camera\nfps = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Path::new("/nonexistent/sightguide.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
