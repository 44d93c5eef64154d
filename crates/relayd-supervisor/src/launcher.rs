use async_trait::async_trait;
use relayd_core::config::RelayConfig;
use relayd_core::StreamId;
use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::LaunchError;

/// Everything needed to build one relay command line.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
	pub stream: &'a StreamId,
	pub source: &'a str,
	pub destination: &'a str,
}

/// How a relay process ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitReport {
	pub code: Option<i32>,
	pub signal: Option<i32>,
	/// Last bytes the relay wrote to stderr, for crash reports only.
	pub stderr_tail: String,
	/// True when the exit was caused by a terminate request.
	pub requested: bool,
}

impl ExitReport {
	pub fn from_status(status: Option<ExitStatus>, stderr_tail: String, requested: bool) -> Self {
		Self {
			code: status.and_then(|s| s.code()),
			signal: status.and_then(|s| s.signal()),
			stderr_tail,
			requested,
		}
	}

	pub fn describe(&self) -> String {
		match (self.code, self.signal) {
			(Some(0), _) => "exited cleanly".to_string(),
			(Some(code), _) => format!("exited with code {}", code),
			(None, Some(sig)) => format!("killed by signal {}", sig),
			(None, None) => "exited with unknown status".to_string(),
		}
	}
}

/// A spawned relay. Owned by exactly one monitor task.
#[async_trait]
pub trait RelayChild: Send {
	fn pid(&self) -> Option<u32>;

	/// Resolves when the process exits on its own.
	async fn wait(&mut self) -> ExitReport;

	/// Asks the process to stop, escalating to a forced kill after `grace`.
	/// Returns immediately if it already exited.
	async fn terminate(&mut self, grace: Duration) -> ExitReport;
}

pub trait Launcher: Send + Sync {
	fn launch(&self, request: &LaunchRequest<'_>) -> Result<Box<dyn RelayChild>, LaunchError>;

	/// Checks that launching can ever succeed. Called once at boot.
	fn preflight(&self) -> Result<(), LaunchError> {
		Ok(())
	}
}

/// Launches the configured relay program as a real OS process.
pub struct CommandLauncher {
	config: RelayConfig,
}

impl CommandLauncher {
	pub fn new(config: RelayConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &RelayConfig {
		&self.config
	}
}

impl Launcher for CommandLauncher {
	fn launch(&self, request: &LaunchRequest<'_>) -> Result<Box<dyn RelayChild>, LaunchError> {
		let mut cmd = Command::new(&self.config.program);
		cmd.args(self.config.render_args(request.source, request.destination))
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.process_group(0);

		let mut child = cmd.spawn().map_err(|e| match e.kind() {
			std::io::ErrorKind::NotFound => LaunchError::ProgramMissing {
				program: self.config.program.clone(),
			},
			_ => LaunchError::Spawn(e),
		})?;

		let tail = StderrTail::new(self.config.stderr_tail_bytes);
		let reader = child.stderr.take().map(|stderr| {
			let tail = tail.clone();
			tokio::spawn(async move {
				pipe_stderr(stderr, tail).await;
			})
		});

		tracing::debug!(stream = %request.stream, pid = ?child.id(), "relay spawned");

		Ok(Box::new(OsRelayChild {
			pid: child.id(),
			child,
			tail,
			reader,
			exited: false,
		}))
	}

	fn preflight(&self) -> Result<(), LaunchError> {
		resolve_program(&self.config.program)
			.map(|_| ())
			.ok_or_else(|| LaunchError::ProgramMissing {
				program: self.config.program.clone(),
			})
	}
}

/// Finds `program` the way a shell would: as a path if it contains a
/// slash, otherwise by searching `PATH`.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
	if program.contains('/') {
		let path = Path::new(program);
		return is_executable(path).then(|| path.to_path_buf());
	}
	let search = std::env::var_os("PATH")?;
	std::env::split_paths(&search)
		.map(|dir| dir.join(program))
		.find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;
	std::fs::metadata(path)
		.map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

struct OsRelayChild {
	pid: Option<u32>,
	child: Child,
	tail: StderrTail,
	reader: Option<JoinHandle<()>>,
	exited: bool,
}

impl OsRelayChild {
	async fn report(&mut self, status: Option<ExitStatus>, requested: bool) -> ExitReport {
		self.exited = true;
		// Let the stderr reader drain what the process wrote before exiting.
		if let Some(reader) = self.reader.take() {
			let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
		}
		ExitReport::from_status(status, self.tail.text().await, requested)
	}
}

#[async_trait]
impl RelayChild for OsRelayChild {
	fn pid(&self) -> Option<u32> {
		self.pid
	}

	async fn wait(&mut self) -> ExitReport {
		let status = self.child.wait().await.ok();
		self.report(status, false).await
	}

	async fn terminate(&mut self, grace: Duration) -> ExitReport {
		if self.exited {
			let status = self.child.try_wait().ok().flatten();
			return ExitReport::from_status(status, self.tail.text().await, false);
		}

		if let Some(pid) = self.pid {
			signal_group(pid, nix::sys::signal::Signal::SIGTERM);
		}

		let status = match tokio::time::timeout(grace, self.child.wait()).await {
			Ok(status) => status.ok(),
			Err(_) => {
				tracing::warn!(pid = ?self.pid, ?grace, "relay ignored SIGTERM, killing");
				if let Some(pid) = self.pid {
					signal_group(pid, nix::sys::signal::Signal::SIGKILL);
				}
				let _ = self.child.start_kill();
				self.child.wait().await.ok()
			}
		};
		self.report(status, true).await
	}
}

/// Signals the whole process group so children of the relay go too.
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	let _ = killpg(Pid::from_raw(pid as i32), signal);
}

/// Bounded ring of the most recent stderr bytes.
#[derive(Clone)]
pub struct StderrTail {
	ring: Arc<Mutex<VecDeque<u8>>>,
	capacity: usize,
}

impl StderrTail {
	pub fn new(capacity: usize) -> Self {
		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
			capacity,
		}
	}

	pub async fn write(&self, data: &[u8]) {
		if self.capacity == 0 {
			return;
		}
		let mut ring = self.ring.lock().await;
		for &byte in data {
			if ring.len() >= self.capacity {
				ring.pop_front();
			}
			ring.push_back(byte);
		}
	}

	pub async fn text(&self) -> String {
		let ring = self.ring.lock().await;
		let bytes: Vec<u8> = ring.iter().copied().collect();
		String::from_utf8_lossy(&bytes).trim().to_string()
	}
}

async fn pipe_stderr<R: tokio::io::AsyncRead + Unpin>(mut reader: R, tail: StderrTail) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => tail.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exit_report_descriptions() {
		let clean = ExitReport { code: Some(0), ..Default::default() };
		assert_eq!(clean.describe(), "exited cleanly");
		let failed = ExitReport { code: Some(1), ..Default::default() };
		assert_eq!(failed.describe(), "exited with code 1");
		let killed = ExitReport { signal: Some(9), ..Default::default() };
		assert_eq!(killed.describe(), "killed by signal 9");
	}

	#[tokio::test]
	async fn stderr_tail_keeps_latest_bytes() {
		let tail = StderrTail::new(4);
		tail.write(b"abcdef").await;
		assert_eq!(tail.text().await, "cdef");
	}

	#[test]
	fn resolve_program_searches_path() {
		assert!(resolve_program("sh").is_some());
		assert!(resolve_program("/bin/sh").is_some());
		assert!(resolve_program("relayd-definitely-not-installed").is_none());
	}
}
