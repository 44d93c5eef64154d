use crate::paths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const SOURCE_PLACEHOLDER: &str = "{source}";
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("invalid config: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
	#[serde(default)]
	pub source: SourceConfig,
	#[serde(default)]
	pub provisioning: ProvisioningConfig,
	#[serde(default)]
	pub timing: TimingConfig,
	#[serde(default)]
	pub relay: RelayConfig,
	#[serde(default)]
	pub cache: CacheConfig,
	#[serde(default)]
	pub telegram: TelegramConfig,
	#[serde(default)]
	pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
	#[serde(default)]
	pub url: String,
	#[serde(default = "default_poll_interval")]
	pub poll_interval_secs: u64,
	#[serde(default = "default_source_timeout")]
	pub timeout_secs: u64,
}

impl Default for SourceConfig {
	fn default() -> Self {
		Self {
			url: String::new(),
			poll_interval_secs: default_poll_interval(),
			timeout_secs: default_source_timeout(),
		}
	}
}

impl SourceConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}
}

fn default_poll_interval() -> u64 {
	20
}
fn default_source_timeout() -> u64 {
	30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
	#[serde(default = "default_api_base")]
	pub api_base: String,
	#[serde(default = "default_resolve_attempts")]
	pub resolve_attempts: u32,
	#[serde(default = "default_resolve_delay")]
	pub resolve_delay_secs: u64,
	#[serde(default = "default_request_timeout")]
	pub request_timeout_secs: u64,
}

impl Default for ProvisioningConfig {
	fn default() -> Self {
		Self {
			api_base: default_api_base(),
			resolve_attempts: default_resolve_attempts(),
			resolve_delay_secs: default_resolve_delay(),
			request_timeout_secs: default_request_timeout(),
		}
	}
}

impl ProvisioningConfig {
	pub fn resolve_delay(&self) -> Duration {
		Duration::from_secs(self.resolve_delay_secs)
	}
}

fn default_api_base() -> String {
	"https://graph.facebook.com/v24.0".to_string()
}
fn default_resolve_attempts() -> u32 {
	15
}
fn default_resolve_delay() -> u64 {
	2
}
fn default_request_timeout() -> u64 {
	30
}

/// Every delay the lifecycle state machine uses, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
	#[serde(default = "default_initial_delay")]
	pub initial_delay_secs: u64,
	#[serde(default = "default_new_stream_delay")]
	pub new_stream_delay_secs: u64,
	#[serde(default = "default_crash_delay")]
	pub crash_delay_secs: u64,
	#[serde(default = "default_rotation_interval")]
	pub rotation_interval_secs: u64,
	#[serde(default = "default_rotation_retry")]
	pub rotation_retry_secs: u64,
	#[serde(default = "default_grace")]
	pub grace_secs: u64,
	#[serde(default = "default_summary_delay")]
	pub summary_report_delay_secs: u64,
}

impl Default for TimingConfig {
	fn default() -> Self {
		Self {
			initial_delay_secs: default_initial_delay(),
			new_stream_delay_secs: default_new_stream_delay(),
			crash_delay_secs: default_crash_delay(),
			rotation_interval_secs: default_rotation_interval(),
			rotation_retry_secs: default_rotation_retry(),
			grace_secs: default_grace(),
			summary_report_delay_secs: default_summary_delay(),
		}
	}
}

impl TimingConfig {
	pub fn initial_delay(&self) -> Duration {
		Duration::from_secs(self.initial_delay_secs)
	}

	pub fn new_stream_delay(&self) -> Duration {
		Duration::from_secs(self.new_stream_delay_secs)
	}

	pub fn crash_delay(&self) -> Duration {
		Duration::from_secs(self.crash_delay_secs)
	}

	pub fn rotation_interval(&self) -> Duration {
		Duration::from_secs(self.rotation_interval_secs)
	}

	pub fn rotation_retry(&self) -> Duration {
		Duration::from_secs(self.rotation_retry_secs)
	}

	pub fn grace(&self) -> Duration {
		Duration::from_secs(self.grace_secs)
	}

	pub fn summary_report_delay(&self) -> Duration {
		Duration::from_secs(self.summary_report_delay_secs)
	}
}

fn default_initial_delay() -> u64 {
	110
}
fn default_new_stream_delay() -> u64 {
	30
}
fn default_crash_delay() -> u64 {
	120
}
fn default_rotation_interval() -> u64 {
	3 * 3600 + 45 * 60
}
fn default_rotation_retry() -> u64 {
	300
}
fn default_grace() -> u64 {
	5
}
fn default_summary_delay() -> u64 {
	300
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
	#[serde(default = "default_program")]
	pub program: String,
	#[serde(default = "default_args")]
	pub args: Vec<String>,
	#[serde(default = "default_stderr_tail")]
	pub stderr_tail_bytes: usize,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			program: default_program(),
			args: default_args(),
			stderr_tail_bytes: default_stderr_tail(),
		}
	}
}

impl RelayConfig {
	/// Expands the argument template for one stream.
	pub fn render_args(&self, source: &str, destination: &str) -> Vec<String> {
		self.args
			.iter()
			.map(|arg| {
				arg.replace(SOURCE_PLACEHOLDER, source)
					.replace(DESTINATION_PLACEHOLDER, destination)
			})
			.collect()
	}
}

fn default_program() -> String {
	"ffmpeg".to_string()
}
fn default_stderr_tail() -> usize {
	4096
}
fn default_args() -> Vec<String> {
	[
		"-hide_banner",
		"-loglevel", "error",
		"-re",
		"-thread_queue_size", "512",
		"-rtbufsize", "256M",
		"-probesize", "32",
		"-analyzeduration", "0",
		"-i", SOURCE_PLACEHOLDER,
		"-c:v", "libx264",
		"-preset", "ultrafast",
		"-tune", "zerolatency",
		"-b:v", "2500k",
		"-maxrate", "2500k",
		"-bufsize", "5000k",
		"-pix_fmt", "yuv420p",
		"-g", "50",
		"-r", "25",
		"-c:a", "aac",
		"-b:a", "96k",
		"-ar", "44100",
		"-ac", "2",
		"-f", "flv",
		"-flvflags", "no_duration_filesize",
		"-avoid_negative_ts", "make_zero",
		"-muxdelay", "0",
		"-muxpreload", "0",
		DESTINATION_PLACEHOLDER,
	]
	.iter()
	.map(|s| s.to_string())
	.collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfig {
	pub path: Option<PathBuf>,
}

impl CacheConfig {
	pub fn resolved_path(&self) -> PathBuf {
		self.path.clone().unwrap_or_else(paths::default_cache_path)
	}
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelegramConfig {
	pub bot_token: Option<String>,
	pub chat_id: Option<String>,
	#[serde(default)]
	pub disable_commands: bool,
}

impl TelegramConfig {
	pub fn is_configured(&self) -> bool {
		matches!((&self.bot_token, &self.chat_id), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
	#[serde(default = "default_rate_limit")]
	pub rate_limit_secs: u64,
	#[serde(default = "default_port")]
	pub http_port: u16,
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self {
			rate_limit_secs: default_rate_limit(),
			http_port: default_port(),
		}
	}
}

fn default_rate_limit() -> u64 {
	5
}
fn default_port() -> u16 {
	13370
}

impl GlobalConfig {
	pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.source.url.trim().is_empty() {
			return Err(ConfigError::Invalid("source.url is required".into()));
		}
		if self.source.poll_interval_secs == 0 {
			return Err(ConfigError::Invalid("source.poll_interval_secs must be > 0".into()));
		}
		if self.timing.rotation_interval_secs == 0 {
			return Err(ConfigError::Invalid("timing.rotation_interval_secs must be > 0".into()));
		}
		if self.provisioning.resolve_attempts == 0 {
			return Err(ConfigError::Invalid("provisioning.resolve_attempts must be > 0".into()));
		}
		if self.relay.program.trim().is_empty() {
			return Err(ConfigError::Invalid("relay.program is required".into()));
		}
		for placeholder in [SOURCE_PLACEHOLDER, DESTINATION_PLACEHOLDER] {
			if !self.relay.args.iter().any(|a| a.contains(placeholder)) {
				return Err(ConfigError::Invalid(format!(
					"relay.args must contain {}",
					placeholder
				)));
			}
		}
		Ok(())
	}
}

/// Loads the global config.
///
/// An explicit path must exist. Without one, a missing default file means
/// defaults; `RELAYD_TELEGRAM_TOKEN` overrides the bot token either way.
pub fn load_global_config(explicit: Option<&Path>) -> Result<GlobalConfig, ConfigError> {
	let path = explicit
		.map(Path::to_path_buf)
		.unwrap_or_else(paths::default_config_path);

	let mut config = if explicit.is_none() && !path.exists() {
		GlobalConfig::default()
	} else {
		let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
			path: path.clone(),
			source,
		})?;
		GlobalConfig::from_toml(&content, &path)?
	};

	if let Ok(token) = std::env::var("RELAYD_TELEGRAM_TOKEN") {
		if !token.trim().is_empty() {
			config.telegram.bot_token = Some(token.trim().to_string());
		}
	}

	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_reference_schedule() {
		let config = GlobalConfig::default();
		assert_eq!(config.timing.initial_delay(), Duration::from_secs(110));
		assert_eq!(config.timing.new_stream_delay(), Duration::from_secs(30));
		assert_eq!(config.timing.crash_delay(), Duration::from_secs(120));
		assert_eq!(config.timing.rotation_interval(), Duration::from_secs(13_500));
		assert_eq!(config.timing.rotation_retry(), Duration::from_secs(300));
		assert_eq!(config.source.poll_interval(), Duration::from_secs(20));
		assert_eq!(config.provisioning.resolve_attempts, 15);
	}

	#[test]
	fn partial_toml_keeps_defaults() {
		let toml = r#"
			[source]
			url = "https://example.test/streams"

			[timing]
			crash_delay_secs = 10
		"#;
		let config = GlobalConfig::from_toml(toml, Path::new("test.toml")).unwrap();
		assert_eq!(config.source.url, "https://example.test/streams");
		assert_eq!(config.timing.crash_delay_secs, 10);
		assert_eq!(config.timing.new_stream_delay_secs, 30);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn validate_requires_placeholders() {
		let mut config = GlobalConfig::default();
		config.source.url = "https://example.test".into();
		config.relay.args = vec!["-i".into(), "{source}".into()];
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("{destination}"));
	}

	#[test]
	fn validate_requires_source_url() {
		assert!(GlobalConfig::default().validate().is_err());
	}

	#[test]
	fn render_args_substitutes_placeholders() {
		let relay = RelayConfig {
			program: "ffmpeg".into(),
			args: vec!["-i".into(), "{source}".into(), "{destination}".into()],
			stderr_tail_bytes: 16,
		};
		assert_eq!(
			relay.render_args("rtmp://in", "rtmps://out/key"),
			vec!["-i", "rtmp://in", "rtmps://out/key"]
		);
	}

	#[test]
	fn default_args_reference_both_endpoints() {
		let args = RelayConfig::default().render_args("SRC", "DST");
		assert!(args.contains(&"SRC".to_string()));
		assert_eq!(args.last().map(String::as_str), Some("DST"));
	}

	#[test]
	fn telegram_requires_token_and_chat() {
		let mut tg = TelegramConfig::default();
		assert!(!tg.is_configured());
		tg.bot_token = Some("t".into());
		tg.chat_id = Some("".into());
		assert!(!tg.is_configured());
		tg.chat_id = Some("-100".into());
		assert!(tg.is_configured());
	}

	#[test]
	fn explicit_missing_path_is_an_error() {
		let missing = std::env::temp_dir().join("relayd-no-such-config.toml");
		let err = load_global_config(Some(&missing)).unwrap_err();
		assert!(matches!(err, ConfigError::Read { .. }));
	}
}
