use std::path::PathBuf;

pub const APP_NAME: &str = "relayd";

pub fn socket_path() -> PathBuf {
	state_dir().join("daemon.sock")
}

pub fn pid_path() -> PathBuf {
	state_dir().join("daemon.pid")
}

pub fn default_cache_path() -> PathBuf {
	state_dir().join("streams_cache.json")
}

pub fn default_config_path() -> PathBuf {
	config_dir().join("config.toml")
}

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME)
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME).join("config")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
