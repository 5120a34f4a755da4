use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration: defaults, then `$FACEGATE_CONFIG` (TOML), then `FACEGATE_*` env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera index, device path, or stream URL (default: 0 → /dev/video0).
    pub video_source: String,
    pub stream_width: u32,
    pub stream_height: u32,
    /// Queued network frames discarded per read.
    pub drain_frames: usize,
    /// Processing rate cap in evaluations per second.
    pub target_fps: f32,
    /// Store lookups count as matched strictly below this distance.
    pub match_threshold: f32,
    /// Enrollment replaces existing records strictly closer than this.
    pub replace_threshold: f32,
    /// Gating: distance at or below this is a flagged identity (REJECT).
    pub accept_threshold: f32,
    pub cooldown_secs: u64,
    pub db_path: PathBuf,
    pub faces_dir: PathBuf,
    pub model_dir: PathBuf,
    pub reload_interval_secs: u64,
    /// Collector websocket; relay disabled when unset.
    pub relay_url: Option<String>,
    pub relay_backoff_secs: u64,
    pub relay_ping_secs: u64,
    /// Attach an annotated JPEG to every event.
    pub attach_frames: bool,
    pub jpeg_quality: u8,
    pub webhook_url: Option<String>,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

/// On-disk overrides; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    video_source: Option<String>,
    stream_width: Option<u32>,
    stream_height: Option<u32>,
    drain_frames: Option<usize>,
    target_fps: Option<f32>,
    match_threshold: Option<f32>,
    replace_threshold: Option<f32>,
    accept_threshold: Option<f32>,
    cooldown_secs: Option<u64>,
    db_path: Option<PathBuf>,
    faces_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    reload_interval_secs: Option<u64>,
    relay_url: Option<String>,
    relay_backoff_secs: Option<u64>,
    relay_ping_secs: Option<u64>,
    attach_frames: Option<bool>,
    jpeg_quality: Option<u8>,
    webhook_url: Option<String>,
    system_bus: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            video_source: "0".to_string(),
            stream_width: 640,
            stream_height: 360,
            drain_frames: 10,
            target_fps: 3.0,
            match_threshold: 1.10,
            replace_threshold: 1.10,
            accept_threshold: 0.95,
            cooldown_secs: 5,
            db_path: data_dir.join("faces.db"),
            faces_dir: data_dir.join("faces"),
            model_dir: facegate_core::default_model_dir(),
            reload_interval_secs: 1,
            relay_url: None,
            relay_backoff_secs: 2,
            relay_ping_secs: 5,
            attach_frames: true,
            jpeg_quality: 70,
            webhook_url: None,
            system_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and `FACEGATE_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FACEGATE_CONFIG") {
            config.apply_file(read_file(Path::new(&path))?);
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.video_source {
            self.video_source = v;
        }
        if let Some(v) = file.stream_width {
            self.stream_width = v;
        }
        if let Some(v) = file.stream_height {
            self.stream_height = v;
        }
        if let Some(v) = file.drain_frames {
            self.drain_frames = v;
        }
        if let Some(v) = file.target_fps {
            self.target_fps = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.replace_threshold {
            self.replace_threshold = v;
        }
        if let Some(v) = file.accept_threshold {
            self.accept_threshold = v;
        }
        if let Some(v) = file.cooldown_secs {
            self.cooldown_secs = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.faces_dir {
            self.faces_dir = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.reload_interval_secs {
            self.reload_interval_secs = v;
        }
        if let Some(v) = file.relay_backoff_secs {
            self.relay_backoff_secs = v;
        }
        if let Some(v) = file.relay_ping_secs {
            self.relay_ping_secs = v;
        }
        if let Some(v) = file.attach_frames {
            self.attach_frames = v;
        }
        if let Some(v) = file.jpeg_quality {
            self.jpeg_quality = v;
        }
        if let Some(v) = file.system_bus {
            self.system_bus = v;
        }
        if file.relay_url.is_some() {
            self.relay_url = file.relay_url;
        }
        if file.webhook_url.is_some() {
            self.webhook_url = file.webhook_url;
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEGATE_VIDEO_SOURCE") {
            self.video_source = v;
        }
        self.stream_width = parse_var(&var, "FACEGATE_STREAM_WIDTH").unwrap_or(self.stream_width);
        self.stream_height = parse_var(&var, "FACEGATE_STREAM_HEIGHT").unwrap_or(self.stream_height);
        self.drain_frames = parse_var(&var, "FACEGATE_DRAIN_FRAMES").unwrap_or(self.drain_frames);
        self.target_fps = parse_var(&var, "FACEGATE_TARGET_FPS").unwrap_or(self.target_fps);
        self.match_threshold = parse_var(&var, "FACEGATE_MATCH_THRESHOLD").unwrap_or(self.match_threshold);
        self.replace_threshold = parse_var(&var, "FACEGATE_REPLACE_THRESHOLD").unwrap_or(self.replace_threshold);
        self.accept_threshold = parse_var(&var, "FACEGATE_ACCEPT_THRESHOLD").unwrap_or(self.accept_threshold);
        self.cooldown_secs = parse_var(&var, "FACEGATE_COOLDOWN_SECS").unwrap_or(self.cooldown_secs);
        if let Some(v) = var("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEGATE_FACES_DIR") {
            self.faces_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.reload_interval_secs = parse_var(&var, "FACEGATE_RELOAD_INTERVAL_SECS").unwrap_or(self.reload_interval_secs);
        if let Some(v) = var("FACEGATE_RELAY_URL") {
            self.relay_url = non_empty(v);
        }
        self.relay_backoff_secs = parse_var(&var, "FACEGATE_RELAY_BACKOFF_SECS").unwrap_or(self.relay_backoff_secs);
        self.relay_ping_secs = parse_var(&var, "FACEGATE_RELAY_PING_SECS").unwrap_or(self.relay_ping_secs);
        if let Some(v) = var("FACEGATE_ATTACH_FRAMES") {
            self.attach_frames = flag(&v);
        }
        self.jpeg_quality = parse_var(&var, "FACEGATE_JPEG_QUALITY").unwrap_or(self.jpeg_quality);
        if let Some(v) = var("FACEGATE_WEBHOOK_URL") {
            self.webhook_url = non_empty(v);
        }
        if let Some(v) = var("FACEGATE_SYSTEM_BUS") {
            self.system_bus = flag(&v);
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn flag(v: &str) -> bool {
    !matches!(v.trim(), "0" | "false" | "no" | "off" | "")
}

fn non_empty(v: String) -> Option<String> {
    if v.trim().is_empty() {
        None
    } else {
        Some(v)
    }
}
