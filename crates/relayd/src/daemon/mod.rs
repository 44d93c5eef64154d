pub mod api;
pub mod socket;

use relayd_core::{paths, ConfigError, CredentialCache, GlobalConfig, LoadOutcome};
use relayd_supervisor::collab::Notifier;
use relayd_supervisor::{Collaborators, CommandLauncher, LogNotifier, Supervisor, SupervisorError, SupervisorOptions};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::graph::GraphProvisioner;
use crate::source::HttpSource;
use crate::telegram::{self, TelegramClient};

#[derive(Debug, Default)]
pub struct RunOptions {
	pub config_path: Option<PathBuf>,
	pub http: bool,
}

#[derive(Debug, Error)]
pub enum DaemonError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("failed to build HTTP client: {0}")]
	Client(#[from] reqwest::Error),
	#[error(transparent)]
	Supervisor(#[from] SupervisorError),
	#[error("failed to prepare {path}: {source}")]
	StateDir {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

pub fn init_logging() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn load_config(opts: &RunOptions) -> Result<GlobalConfig, ConfigError> {
	let config = relayd_core::config::load_global_config(opts.config_path.as_deref())?;
	config.validate()?;
	Ok(config)
}

fn log_cache_outcome(outcome: &LoadOutcome) {
	match outcome {
		LoadOutcome::Missing => tracing::info!("no credential cache yet, starting empty"),
		LoadOutcome::Empty => tracing::info!("credential cache is empty"),
		LoadOutcome::Loaded(n) => tracing::info!("loaded {} cached credentials", n),
		LoadOutcome::Corrupted { reason, backup } => match backup {
			Some(path) => tracing::warn!(
				"credential cache unreadable ({}), moved to {}; starting empty",
				reason,
				path.display()
			),
			None => tracing::warn!("credential cache unreadable ({}); starting empty", reason),
		},
	}
}

pub async fn run(opts: RunOptions) -> Result<(), DaemonError> {
	let config = load_config(&opts)?;

	let state_dir = paths::state_dir();
	std::fs::create_dir_all(&state_dir).map_err(|source| DaemonError::StateDir {
		path: state_dir.clone(),
		source,
	})?;

	let pid_path = paths::pid_path();
	let _ = std::fs::write(&pid_path, std::process::id().to_string());

	let socket_path = paths::socket_path();
	if socket_path.exists() {
		let _ = std::fs::remove_file(&socket_path);
	}

	let cache_path = config.cache.resolved_path();
	let (cache, outcome) = CredentialCache::load(&cache_path);
	log_cache_outcome(&outcome);

	let telegram = TelegramClient::from_config(&config.telegram)?.map(Arc::new);
	let notifier: Arc<dyn Notifier> = match &telegram {
		Some(client) => Arc::clone(client) as Arc<dyn Notifier>,
		None => {
			tracing::info!("telegram not configured, notifications go to the log");
			Arc::new(LogNotifier)
		}
	};

	let sup = Supervisor::new(
		SupervisorOptions::from_config(&config),
		Collaborators {
			launcher: Arc::new(CommandLauncher::new(config.relay.clone())),
			provisioner: Arc::new(GraphProvisioner::new(&config.provisioning)?),
			source: Arc::new(HttpSource::new(&config.source)?),
			notifier,
		},
		cache,
	);

	tracing::info!(
		"daemon starting (pid {}, cache {})",
		std::process::id(),
		cache_path.display()
	);

	let result = serve(&sup, &config, &opts, telegram).await;

	let _ = std::fs::remove_file(&socket_path);
	let _ = std::fs::remove_file(&pid_path);
	result
}

async fn serve(
	sup: &Arc<Supervisor>,
	config: &GlobalConfig,
	opts: &RunOptions,
	telegram: Option<Arc<TelegramClient>>,
) -> Result<(), DaemonError> {
	let socket_path = paths::socket_path();
	let sup_socket = Arc::clone(sup);
	let socket_handle = tokio::spawn(async move {
		socket::run_socket_server(&socket_path, sup_socket).await;
	});

	let http_handle = opts.http.then(|| {
		let sup_http = Arc::clone(sup);
		let port = config.control.http_port;
		tokio::spawn(async move {
			api::run_http_server(sup_http, port).await;
		})
	});

	let booted = tokio::select! {
		result = sup.boot() => Some(result),
		_ = wait_for_signal() => None,
	};

	match booted {
		Some(Ok(())) => {
			sup.spawn_reconciler().await;
			if let Some(client) = telegram.filter(|_| !config.telegram.disable_commands) {
				tokio::spawn(telegram::run_command_poller(client, Arc::clone(sup)));
			}
			tracing::info!("daemon running");
			wait_for_signal().await;
		}
		Some(Err(e)) => {
			tracing::error!("boot failed: {}", e);
			socket_handle.abort();
			if let Some(h) = http_handle {
				h.abort();
			}
			return Err(e.into());
		}
		None => tracing::info!("interrupted during boot"),
	}

	sup.shutdown().await;
	socket_handle.abort();
	if let Some(h) = http_handle {
		h.abort();
	}
	Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut term = match signal(SignalKind::terminate()) {
		Ok(s) => Some(s),
		Err(e) => {
			tracing::warn!("cannot listen for SIGTERM: {}", e);
			None
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => tracing::info!("received interrupt"),
		_ = async {
			match term.as_mut() {
				Some(s) => { s.recv().await; }
				None => std::future::pending::<()>().await,
			}
		} => tracing::info!("received SIGTERM"),
	}
}
