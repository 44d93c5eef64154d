//! One monitor task per live relay process.
//!
//! The monitor owns the child. It waits for either a natural exit or a stop
//! request from the stream actor, and in both cases delivers exactly one
//! [`StreamEvent::Exited`] tagged with the generation the process was
//! launched under.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::launcher::{ExitReport, RelayChild};
use crate::stream::StreamEvent;

/// Grace used when a handle is dropped without an explicit terminate.
const DROP_GRACE: Duration = Duration::from_secs(2);

/// The stream's side of a monitored process.
#[derive(Debug)]
pub struct ProcessHandle {
	pid: Option<u32>,
	stop: Option<oneshot::Sender<Duration>>,
	monitor: Option<JoinHandle<ExitReport>>,
}

pub fn watch(
	mut child: Box<dyn RelayChild>,
	generation: u64,
	tx: UnboundedSender<StreamEvent>,
) -> ProcessHandle {
	let pid = child.pid();
	let (stop_tx, stop_rx) = oneshot::channel::<Duration>();

	let monitor = tokio::spawn(async move {
		let report = tokio::select! {
			report = child.wait() => report,
			grace = stop_rx => {
				child.terminate(grace.unwrap_or(DROP_GRACE)).await
			}
		};
		let _ = tx.send(StreamEvent::Exited {
			generation,
			report: report.clone(),
		});
		report
	});

	ProcessHandle {
		pid,
		stop: Some(stop_tx),
		monitor: Some(monitor),
	}
}

impl ProcessHandle {
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn has_exited(&self) -> bool {
		self.monitor.as_ref().map_or(true, |m| m.is_finished())
	}

	/// Stops the process and waits for the monitor to finish.
	///
	/// Safe to call after the process already exited: the monitor has then
	/// reported the natural exit and this just collects it.
	pub async fn terminate(mut self, grace: Duration) -> Option<ExitReport> {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(grace);
		}
		let monitor = self.monitor.take()?;
		match monitor.await {
			Ok(report) => Some(report),
			Err(e) => {
				tracing::warn!(pid = ?self.pid, error = %e, "relay monitor task failed");
				None
			}
		}
	}
}

impl Drop for ProcessHandle {
	fn drop(&mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(DROP_GRACE);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::launcher::{CommandLauncher, LaunchRequest, Launcher};
	use relayd_core::config::RelayConfig;
	use relayd_core::StreamId;
	use tokio::sync::mpsc;

	fn shell(script: &str) -> Box<dyn RelayChild> {
		let config = RelayConfig {
			program: "sh".into(),
			args: vec!["-c".into(), script.into(), "{source}".into(), "{destination}".into()],
			stderr_tail_bytes: 256,
		};
		let id = StreamId::from("stream_test");
		CommandLauncher::new(config)
			.launch(&LaunchRequest {
				stream: &id,
				source: "in",
				destination: "out",
			})
			.unwrap()
	}

	#[tokio::test]
	async fn natural_exit_is_reported_once() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let handle = watch(shell("echo broken pipe >&2; exit 3"), 4, tx);

		match rx.recv().await {
			Some(StreamEvent::Exited { generation, report }) => {
				assert_eq!(generation, 4);
				assert_eq!(report.code, Some(3));
				assert!(!report.requested);
				assert!(report.stderr_tail.contains("broken pipe"));
			}
			other => panic!("unexpected event {:?}", other),
		}

		// Collecting after the fact must not produce a second event.
		assert!(handle.terminate(Duration::from_secs(1)).await.is_some());
		assert!(rx.recv().await.is_none());
	}

	#[tokio::test]
	async fn terminate_stops_a_running_relay() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let handle = watch(shell("sleep 30"), 1, tx);
		assert!(handle.pid().is_some());

		let report = handle.terminate(Duration::from_secs(2)).await.unwrap();
		assert!(report.requested);
		assert!(report.signal.is_some() || report.code.is_some());

		assert!(matches!(rx.recv().await, Some(StreamEvent::Exited { generation: 1, .. })));
		assert!(rx.recv().await.is_none());
	}

	#[tokio::test]
	async fn stubborn_relay_is_killed_after_grace() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let handle = watch(shell("trap '' TERM; sleep 30"), 1, tx);
		// Give the shell a moment to install the trap.
		tokio::time::sleep(Duration::from_millis(200)).await;

		let started = std::time::Instant::now();
		let report = handle.terminate(Duration::from_millis(300)).await.unwrap();
		assert!(started.elapsed() < Duration::from_secs(10));
		assert_eq!(report.signal, Some(9));
	}
}
