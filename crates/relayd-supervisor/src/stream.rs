//! Per-stream lifecycle actor.
//!
//! Each tracked stream is owned by one task that drains a single event
//! queue. Timers, the process monitor, provisioning tasks and the
//! reconciler only ever send events; all state lives inside the task, so
//! events for one stream are applied strictly in order.
//!
//! Every state transition bumps a generation counter. Deferred events carry
//! the generation they were scheduled under and are dropped if it no longer
//! matches, which makes a timer that fires after being superseded a no-op.

use relayd_core::config::TimingConfig;
use relayd_core::{CredentialRecord, StreamDescriptor, StreamId, StreamState, StreamStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::collab::{DestinationProvisioner, NotifySink};
use crate::error::ProvisionError;
use crate::launcher::{ExitReport, LaunchRequest, Launcher};
use crate::monitor::{self, ProcessHandle};
use crate::provision::provision;
use crate::report;
use crate::retry::RetryPolicy;
use crate::store::CredentialStore;
use crate::timer::TimerSlot;

/// Collaborators and settings shared by every stream actor.
pub struct StreamContext {
	pub timing: TimingConfig,
	pub resolve_policy: RetryPolicy,
	pub launcher: Arc<dyn Launcher>,
	pub provisioner: Arc<dyn DestinationProvisioner>,
	pub notifier: NotifySink,
	pub store: CredentialStore,
	pub transitions: broadcast::Sender<Transition>,
}

/// Broadcast on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
	pub id: StreamId,
	pub from: StreamState,
	pub to: StreamState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPurpose {
	Start,
	Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
	/// The stream left desired state; its credential goes too.
	Removed,
	/// The supervisor is exiting; the credential is kept for the next boot.
	Shutdown,
}

#[derive(Debug)]
pub enum StreamEvent {
	StartDue {
		generation: u64,
	},
	RestartDue {
		generation: u64,
	},
	RotationDue {
		generation: u64,
	},
	Provisioned {
		generation: u64,
		purpose: ProvisionPurpose,
		result: Result<CredentialRecord, ProvisionError>,
	},
	Exited {
		generation: u64,
		report: ExitReport,
	},
	Update(StreamDescriptor),
	Inspect(oneshot::Sender<StreamStatus>),
}

/// Sent on the actor's stop channel, which bypasses the event queue.
struct StopRequest {
	reason: StopReason,
	done: oneshot::Sender<()>,
}

/// What asked for a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartTrigger {
	/// Boot delay, new-stream delay, the delay after a rotation, or the
	/// retry after provisioning failed.
	Scheduled,
	/// Crash delay elapsed.
	Restart,
}

/// Launch guard: a stream already Starting or Restarting never gets a second
/// launch racing for the same credential.
fn start_allowed(state: StreamState, trigger: StartTrigger) -> bool {
	match (state, trigger) {
		(StreamState::Idle | StreamState::Rotating | StreamState::Failed, StartTrigger::Scheduled) => true,
		(StreamState::Restarting, StartTrigger::Restart) => true,
		_ => false,
	}
}

struct LifecycleRecord {
	ctx: Arc<StreamContext>,
	tx: mpsc::UnboundedSender<StreamEvent>,
	descriptor: StreamDescriptor,
	state: StreamState,
	generation: u64,
	process: Option<ProcessHandle>,
	started_at: Option<Instant>,
	start_timer: TimerSlot,
	restart_timer: TimerSlot,
	rotation_timer: TimerSlot,
	provisioning: Option<JoinHandle<()>>,
	crashes: u32,
	rotations: u32,
	last_exit: Option<String>,
}

impl LifecycleRecord {
	fn id(&self) -> &StreamId {
		&self.descriptor.id
	}

	fn transition(&mut self, to: StreamState) {
		let from = self.state;
		self.state = to;
		self.generation += 1;
		tracing::info!(stream = %self.descriptor.id, name = %self.descriptor.name, %from, %to, "state change");
		let _ = self.ctx.transitions.send(Transition {
			id: self.descriptor.id.clone(),
			from,
			to,
		});
	}

	fn stale(&self, kind: &str, generation: u64) -> bool {
		if generation != self.generation {
			tracing::debug!(
				stream = %self.descriptor.id,
				event = kind,
				generation,
				current = self.generation,
				"stale event ignored"
			);
			return true;
		}
		false
	}

	async fn handle(&mut self, event: StreamEvent) {
		match event {
			StreamEvent::StartDue { generation } => {
				if !self.stale("start", generation) {
					self.request_start(StartTrigger::Scheduled).await;
				}
			}
			StreamEvent::RestartDue { generation } => {
				if !self.stale("restart", generation) {
					self.request_start(StartTrigger::Restart).await;
				}
			}
			StreamEvent::RotationDue { generation } => {
				if self.stale("rotation", generation) {
					return;
				}
				match self.state {
					StreamState::Running | StreamState::Failed => self.rotate().await,
					state => tracing::debug!(stream = %self.id(), %state, "rotation skipped"),
				}
			}
			StreamEvent::Provisioned {
				generation,
				purpose,
				result,
			} => {
				if self.stale("provisioned", generation) {
					return;
				}
				self.provisioning = None;
				match purpose {
					ProvisionPurpose::Start => self.on_start_credential(result).await,
					ProvisionPurpose::Rotation => self.on_rotation_credential(result).await,
				}
			}
			StreamEvent::Exited { generation, report } => self.on_exit(generation, report).await,
			StreamEvent::Update(desc) => {
				if desc.id == self.descriptor.id && desc != self.descriptor {
					tracing::debug!(stream = %desc.id, "descriptor updated");
					self.descriptor = desc;
				}
			}
			StreamEvent::Inspect(reply) => {
				let _ = reply.send(self.status().await);
			}
		}
	}

	async fn request_start(&mut self, trigger: StartTrigger) {
		if !start_allowed(self.state, trigger) {
			tracing::warn!(
				stream = %self.id(),
				state = %self.state,
				?trigger,
				"launch refused"
			);
			return;
		}

		self.start_timer.cancel();
		self.restart_timer.cancel();
		self.transition(StreamState::Starting);

		match self.ctx.store.get(&self.descriptor.id).await {
			Some(record) => self.launch(record).await,
			None => self.spawn_provisioning(ProvisionPurpose::Start),
		}
	}

	async fn launch(&mut self, record: CredentialRecord) {
		let launched = self.ctx.launcher.launch(&LaunchRequest {
			stream: &self.descriptor.id,
			source: &self.descriptor.source_uri,
			destination: &record.destination_url,
		});

		match launched {
			Ok(child) => {
				self.transition(StreamState::Running);
				self.started_at = Some(Instant::now());
				self.process = Some(monitor::watch(child, self.generation, self.tx.clone()));
				self.rotation_timer.arm(
					self.ctx.timing.rotation_interval(),
					&self.tx,
					StreamEvent::RotationDue {
						generation: self.generation,
					},
				);
				tracing::info!(
					stream = %self.id(),
					pid = ?self.process.as_ref().and_then(|p| p.pid()),
					"relay running"
				);
			}
			Err(e) => {
				tracing::warn!(stream = %self.id(), error = %e, "relay launch failed");
				self.transition(StreamState::Failed);
				self.crash(format!("launch failed: {}", e), None).await;
			}
		}
	}

	async fn on_start_credential(&mut self, result: Result<CredentialRecord, ProvisionError>) {
		if self.state != StreamState::Starting {
			return;
		}
		match result {
			Ok(record) => {
				self.ctx.store.put(self.descriptor.id.clone(), record.clone()).await;
				self.launch(record).await;
			}
			// Nothing was launched, so this is not a crash.
			Err(e) => {
				let retry = self.ctx.timing.rotation_retry();
				tracing::warn!(stream = %self.id(), error = %e, ?retry, "provisioning before start failed");
				self.transition(StreamState::Failed);
				self.start_timer.arm(
					retry,
					&self.tx,
					StreamEvent::StartDue {
						generation: self.generation,
					},
				);
				self.ctx
					.notifier
					.send(report::provisioning_failed(&self.descriptor, &e.to_string(), retry));
			}
		}
	}

	async fn on_exit(&mut self, generation: u64, report: ExitReport) {
		if self.state == StreamState::Rotating {
			tracing::info!(stream = %self.id(), exit = %report.describe(), "exit during rotation ignored");
			return;
		}
		if self.stale("exit", generation) || self.state != StreamState::Running {
			return;
		}

		let reason = match report.code {
			Some(0) => "Stream ended unexpectedly".to_string(),
			_ => format!("relay {}", report.describe()),
		};
		tracing::warn!(stream = %self.id(), %reason, "relay exited");
		self.crash(reason, Some(report)).await;
	}

	/// Crash path: tear the process down and schedule a restart.
	async fn crash(&mut self, reason: String, report: Option<ExitReport>) {
		self.rotation_timer.cancel();
		let uptime = self.started_at.take().map(|t| t.elapsed());
		let mut report = report;
		if let Some(process) = self.process.take() {
			let collected = process.terminate(self.ctx.timing.grace()).await;
			report = report.or(collected);
		}

		self.crashes += 1;
		self.last_exit = Some(reason.clone());
		self.transition(StreamState::Restarting);

		let delay = self.ctx.timing.crash_delay();
		self.restart_timer.arm(
			delay,
			&self.tx,
			StreamEvent::RestartDue {
				generation: self.generation,
			},
		);

		let tail = report.map(|r| r.stderr_tail).unwrap_or_default();
		self.ctx
			.notifier
			.send(report::crash_report(&self.descriptor, &reason, &tail, uptime, delay));
	}

	async fn rotate(&mut self) {
		tracing::info!(stream = %self.id(), "rotating credential");
		self.rotation_timer.cancel();
		self.transition(StreamState::Rotating);

		if let Some(process) = self.process.take() {
			process.terminate(self.ctx.timing.grace()).await;
		}
		self.started_at = None;

		// The old credential is gone on disk before a new one is requested.
		self.ctx.store.remove(&self.descriptor.id).await;
		self.spawn_provisioning(ProvisionPurpose::Rotation);
	}

	async fn on_rotation_credential(&mut self, result: Result<CredentialRecord, ProvisionError>) {
		if self.state != StreamState::Rotating {
			return;
		}
		match result {
			Ok(record) => {
				self.ctx.store.put(self.descriptor.id.clone(), record.clone()).await;
				self.rotations += 1;
				let delay = self.ctx.timing.new_stream_delay();
				self.start_timer.arm(
					delay,
					&self.tx,
					StreamEvent::StartDue {
						generation: self.generation,
					},
				);
				tracing::info!(stream = %self.id(), ?delay, "credential rotated");
				self.ctx
					.notifier
					.send(report::rotation_report(&self.descriptor, &record, delay));
			}
			Err(e) => {
				let retry = self.ctx.timing.rotation_retry();
				tracing::warn!(stream = %self.id(), error = %e, ?retry, "rotation failed");
				self.transition(StreamState::Failed);
				self.rotation_timer.arm(
					retry,
					&self.tx,
					StreamEvent::RotationDue {
						generation: self.generation,
					},
				);
				self.ctx
					.notifier
					.send(report::rotation_failed(&self.descriptor, &e.to_string(), retry));
			}
		}
	}

	fn spawn_provisioning(&mut self, purpose: ProvisionPurpose) {
		if let Some(task) = self.provisioning.take() {
			task.abort();
		}
		let provisioner = Arc::clone(&self.ctx.provisioner);
		let policy = self.ctx.resolve_policy;
		let desc = self.descriptor.clone();
		let tx = self.tx.clone();
		let generation = self.generation;
		self.provisioning = Some(tokio::spawn(async move {
			let result = provision(provisioner.as_ref(), &desc, policy).await;
			let _ = tx.send(StreamEvent::Provisioned {
				generation,
				purpose,
				result,
			});
		}));
	}

	async fn teardown(&mut self, reason: StopReason) {
		self.start_timer.cancel();
		self.restart_timer.cancel();
		self.rotation_timer.cancel();
		if let Some(task) = self.provisioning.take() {
			task.abort();
		}
		if let Some(process) = self.process.take() {
			process.terminate(self.ctx.timing.grace()).await;
		}
		self.started_at = None;
		// Anything still queued belongs to a previous generation.
		self.generation += 1;

		if reason == StopReason::Removed {
			self.ctx.store.remove(&self.descriptor.id).await;
		}
		tracing::info!(stream = %self.id(), ?reason, state = %self.state, "stream stopped");
	}

	async fn status(&self) -> StreamStatus {
		let preview_url = self
			.ctx
			.store
			.get(&self.descriptor.id)
			.await
			.map(|r| r.preview_url);
		StreamStatus {
			id: self.descriptor.id.clone(),
			name: self.descriptor.name.clone(),
			state: self.state,
			pid: self.process.as_ref().and_then(|p| p.pid()),
			uptime_secs: self.started_at.map(|t| t.elapsed().as_secs()),
			preview_url,
			crashes: self.crashes,
			rotations: self.rotations,
			last_exit: self.last_exit.clone(),
		}
	}
}

async fn run(
	mut record: LifecycleRecord,
	mut rx: mpsc::UnboundedReceiver<StreamEvent>,
	mut stop_rx: mpsc::Receiver<StopRequest>,
) {
	loop {
		tokio::select! {
			biased;
			request = stop_rx.recv() => {
				match request {
					Some(StopRequest { reason, done }) => {
						record.teardown(reason).await;
						let _ = done.send(());
					}
					// Handle dropped without a stop: same as a shutdown.
					None => record.teardown(StopReason::Shutdown).await,
				}
				return;
			}
			Some(event) = rx.recv() => record.handle(event).await,
		}
	}
}

/// Supervisor-side handle to a stream actor.
pub struct StreamHandle {
	descriptor: StreamDescriptor,
	tx: mpsc::UnboundedSender<StreamEvent>,
	stop_tx: mpsc::Sender<StopRequest>,
	join: JoinHandle<()>,
}

impl StreamHandle {
	/// Spawns the actor in Idle with its first start scheduled after `start_after`.
	pub fn spawn(ctx: Arc<StreamContext>, descriptor: StreamDescriptor, start_after: Duration) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let (stop_tx, stop_rx) = mpsc::channel(1);
		let mut record = LifecycleRecord {
			ctx,
			tx: tx.clone(),
			descriptor: descriptor.clone(),
			state: StreamState::Idle,
			generation: 0,
			process: None,
			started_at: None,
			start_timer: TimerSlot::new(),
			restart_timer: TimerSlot::new(),
			rotation_timer: TimerSlot::new(),
			provisioning: None,
			crashes: 0,
			rotations: 0,
			last_exit: None,
		};
		record.start_timer.arm(start_after, &tx, StreamEvent::StartDue { generation: 0 });
		tracing::debug!(stream = %descriptor.id, ?start_after, "stream tracked");

		let join = tokio::spawn(run(record, rx, stop_rx));
		Self {
			descriptor,
			tx,
			stop_tx,
			join,
		}
	}

	pub fn id(&self) -> &StreamId {
		&self.descriptor.id
	}

	pub fn descriptor(&self) -> &StreamDescriptor {
		&self.descriptor
	}

	pub fn sender(&self) -> mpsc::UnboundedSender<StreamEvent> {
		self.tx.clone()
	}

	/// Replaces the descriptor without touching the current state.
	pub fn update(&mut self, descriptor: StreamDescriptor) {
		self.descriptor = descriptor.clone();
		let _ = self.tx.send(StreamEvent::Update(descriptor));
	}

	/// Stops the actor and waits until its process and timers are gone.
	pub async fn stop(self, reason: StopReason) {
		let (done_tx, done_rx) = oneshot::channel();
		let request = StopRequest {
			reason,
			done: done_tx,
		};
		if self.stop_tx.send(request).await.is_ok() {
			let _ = done_rx.await;
		}
		let _ = self.join.await;
	}
}

/// Asks an actor for its status; `None` if it already stopped.
pub async fn inspect(tx: &mpsc::UnboundedSender<StreamEvent>) -> Option<StreamStatus> {
	let (reply_tx, reply_rx) = oneshot::channel();
	tx.send(StreamEvent::Inspect(reply_tx)).ok()?;
	reply_rx.await.ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn launch_guard() {
		use StartTrigger::*;
		use StreamState::*;

		assert!(start_allowed(Idle, Scheduled));
		assert!(start_allowed(Rotating, Scheduled));
		assert!(start_allowed(Restarting, Restart));

		assert!(!start_allowed(Starting, Scheduled));
		assert!(!start_allowed(Starting, Restart));
		assert!(!start_allowed(Restarting, Scheduled));
		assert!(!start_allowed(Running, Scheduled));
		assert!(!start_allowed(Running, Restart));
		assert!(!start_allowed(Failed, Restart));
		assert!(start_allowed(Failed, Scheduled));
	}
}
