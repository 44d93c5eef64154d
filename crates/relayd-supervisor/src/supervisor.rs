use relayd_core::config::TimingConfig;
use relayd_core::{normalize_all, CredentialCache, GlobalConfig, StreamDescriptor, StreamId, StreamStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::collab::{DesiredStateSource, DestinationProvisioner, Notifier, NotifySink};
use crate::control::{Command, RateLimiter};
use crate::error::{SourceError, SupervisorError};
use crate::launcher::Launcher;
use crate::provision::provision;
use crate::reconcile::{self, ReconcilePlan};
use crate::report::{self, FleetView};
use crate::retry::RetryPolicy;
use crate::store::CredentialStore;
use crate::stream::{self, StopReason, StreamContext, StreamHandle, Transition};

pub struct SupervisorOptions {
	pub timing: TimingConfig,
	pub poll_interval: Duration,
	pub resolve_policy: RetryPolicy,
	pub rate_limit: Duration,
}

impl SupervisorOptions {
	pub fn from_config(config: &GlobalConfig) -> Self {
		Self {
			timing: config.timing.clone(),
			poll_interval: config.source.poll_interval(),
			resolve_policy: RetryPolicy::fixed(
				config.provisioning.resolve_attempts,
				config.provisioning.resolve_delay(),
			),
			rate_limit: Duration::from_secs(config.control.rate_limit_secs),
		}
	}
}

pub struct Collaborators {
	pub launcher: Arc<dyn Launcher>,
	pub provisioner: Arc<dyn DestinationProvisioner>,
	pub source: Arc<dyn DesiredStateSource>,
	pub notifier: Arc<dyn Notifier>,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
	pub added: Vec<StreamId>,
	pub removed: Vec<StreamId>,
	pub updated: Vec<StreamId>,
	/// New streams left untracked because provisioning failed.
	pub skipped: Vec<StreamId>,
}

impl ReconcileSummary {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty() && self.skipped.is_empty()
	}
}

/// Owns every tracked stream and drives boot, reconciliation and shutdown.
pub struct Supervisor {
	options: SupervisorOptions,
	ctx: Arc<StreamContext>,
	source: Arc<dyn DesiredStateSource>,
	streams: RwLock<BTreeMap<StreamId, StreamHandle>>,
	/// Last successfully fetched desired state.
	desired: RwLock<Vec<StreamDescriptor>>,
	/// Serializes boot, reconciliation passes and shutdown.
	reconcile_lock: Mutex<()>,
	limiter: Mutex<RateLimiter<String>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	shutdown: watch::Sender<bool>,
	started_at: Instant,
}

impl Supervisor {
	pub fn new(options: SupervisorOptions, collab: Collaborators, cache: CredentialCache) -> Arc<Self> {
		let (transitions, _) = broadcast::channel(256);
		let (shutdown, _) = watch::channel(false);
		let ctx = Arc::new(StreamContext {
			timing: options.timing.clone(),
			resolve_policy: options.resolve_policy,
			launcher: collab.launcher,
			provisioner: collab.provisioner,
			notifier: NotifySink::new(collab.notifier),
			store: CredentialStore::new(cache),
			transitions,
		});
		Arc::new(Self {
			limiter: Mutex::new(RateLimiter::new(options.rate_limit)),
			options,
			ctx,
			source: collab.source,
			streams: RwLock::new(BTreeMap::new()),
			desired: RwLock::new(Vec::new()),
			reconcile_lock: Mutex::new(()),
			tasks: Mutex::new(Vec::new()),
			shutdown,
			started_at: Instant::now(),
		})
	}

	pub fn options(&self) -> &SupervisorOptions {
		&self.options
	}

	pub fn store(&self) -> &CredentialStore {
		&self.ctx.store
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
		self.ctx.transitions.subscribe()
	}

	pub fn uptime(&self) -> Duration {
		self.started_at.elapsed()
	}

	pub fn is_shutting_down(&self) -> bool {
		*self.shutdown.borrow()
	}

	/// Resolves once [`shutdown`](Self::shutdown) has been requested.
	pub async fn wait_for_shutdown(&self) {
		let mut rx = self.shutdown.subscribe();
		let _ = rx.wait_for(|stopping| *stopping).await;
	}

	/// Loads initial desired state, provisions what the cache lacks and
	/// schedules every stream to start after the initial delay.
	pub async fn boot(self: &Arc<Self>) -> Result<(), SupervisorError> {
		self.ctx.launcher.preflight()?;

		let _guard = self.reconcile_lock.lock().await;
		if self.is_shutting_down() {
			return Err(SupervisorError::ShuttingDown);
		}

		let desired = match self.fetch_desired().await {
			Ok(desired) => {
				let keep: BTreeSet<StreamId> = desired.iter().map(|d| d.id.clone()).collect();
				let pruned = self.ctx.store.retain(|id| keep.contains(id)).await;
				if pruned > 0 {
					tracing::info!(pruned, "dropped cached credentials for streams no longer desired");
				}
				desired
			}
			Err(e) => {
				tracing::warn!(error = %e, "initial fetch failed, starting with no streams");
				Vec::new()
			}
		};

		let timing = &self.options.timing;
		self.ctx.notifier.send(report::startup_message(
			desired.len(),
			self.ctx.store.len().await,
			timing,
		));

		let mut jobs = JoinSet::new();
		for desc in &desired {
			if self.ctx.store.contains(&desc.id).await {
				continue;
			}
			tracing::info!(stream = %desc.id, name = %desc.name, "provisioning destination");
			let provisioner = Arc::clone(&self.ctx.provisioner);
			let policy = self.options.resolve_policy;
			let desc = desc.clone();
			jobs.spawn(async move {
				let result = provision(provisioner.as_ref(), &desc, policy).await;
				(desc, result)
			});
		}
		while let Some(joined) = jobs.join_next().await {
			match joined {
				Ok((desc, Ok(record))) => self.ctx.store.put(desc.id.clone(), record).await,
				// Untracked streams show up as additions on the next pass.
				Ok((desc, Err(e))) => {
					tracing::warn!(stream = %desc.id, error = %e, "boot provisioning failed, will retry next pass")
				}
				Err(e) => tracing::error!(error = %e, "provisioning task failed"),
			}
		}

		let mut scheduled = 0;
		{
			let mut streams = self.streams.write().await;
			for desc in &desired {
				if !self.ctx.store.contains(&desc.id).await {
					continue;
				}
				let handle = StreamHandle::spawn(Arc::clone(&self.ctx), desc.clone(), timing.initial_delay());
				streams.insert(desc.id.clone(), handle);
				scheduled += 1;
			}
		}
		tracing::info!(
			streams = scheduled,
			skipped = desired.len() - scheduled,
			delay = ?timing.initial_delay(),
			"boot complete, streams scheduled"
		);
		*self.desired.write().await = desired;

		self.spawn_summary_report().await;
		Ok(())
	}

	async fn fetch_desired(&self) -> Result<Vec<StreamDescriptor>, SourceError> {
		let raw = self.source.fetch().await?;
		Ok(normalize_all(&raw))
	}

	/// One reconciliation pass. A fetch failure leaves everything as it was.
	pub async fn reconcile_once(&self) -> Result<ReconcileSummary, SourceError> {
		let _guard = self.reconcile_lock.lock().await;
		if self.is_shutting_down() {
			return Ok(ReconcileSummary::default());
		}

		let desired = self.fetch_desired().await?;
		let tracked: BTreeMap<StreamId, StreamDescriptor> = self
			.streams
			.read()
			.await
			.iter()
			.map(|(id, handle)| (id.clone(), handle.descriptor().clone()))
			.collect();
		let ReconcilePlan {
			added,
			removed,
			updated,
		} = reconcile::plan(&tracked, &desired);

		let mut summary = ReconcileSummary::default();

		for id in removed {
			let handle = self.streams.write().await.remove(&id);
			if let Some(handle) = handle {
				let desc = handle.descriptor().clone();
				tracing::info!(stream = %id, name = %desc.name, "stream removed from desired state");
				handle.stop(StopReason::Removed).await;
				self.ctx.notifier.send(report::stream_removed(&desc));
				summary.removed.push(id);
			}
		}

		{
			let mut streams = self.streams.write().await;
			for desc in updated {
				if let Some(handle) = streams.get_mut(&desc.id) {
					summary.updated.push(desc.id.clone());
					handle.update(desc);
				}
			}
		}

		for desc in added {
			if !self.ctx.store.contains(&desc.id).await {
				tracing::info!(stream = %desc.id, name = %desc.name, "new stream, provisioning destination");
				match provision(self.ctx.provisioner.as_ref(), &desc, self.options.resolve_policy).await {
					Ok(record) => self.ctx.store.put(desc.id.clone(), record).await,
					Err(e) => {
						tracing::warn!(stream = %desc.id, error = %e, "provisioning failed, will retry next pass");
						summary.skipped.push(desc.id);
						continue;
					}
				}
			}

			if self.is_shutting_down() {
				break;
			}
			let delay = self.options.timing.new_stream_delay();
			tracing::info!(stream = %desc.id, name = %desc.name, ?delay, "new stream scheduled");
			let mut streams = self.streams.write().await;
			summary.added.push(desc.id.clone());
			streams.insert(
				desc.id.clone(),
				StreamHandle::spawn(Arc::clone(&self.ctx), desc, delay),
			);
		}

		*self.desired.write().await = desired;
		if !summary.is_empty() {
			tracing::info!(
				added = summary.added.len(),
				removed = summary.removed.len(),
				updated = summary.updated.len(),
				skipped = summary.skipped.len(),
				"reconciled"
			);
		}
		Ok(summary)
	}

	/// Runs reconciliation on the poll interval until shutdown.
	pub async fn run_reconciler(self: Arc<Self>) {
		let period = self.options.poll_interval;
		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if let Err(e) = self.reconcile_once().await {
						tracing::warn!(error = %e, "desired state fetch failed, keeping previous list");
					}
				}
				_ = self.wait_for_shutdown() => break,
			}
		}
		tracing::debug!("reconciler stopped");
	}

	pub async fn spawn_reconciler(self: &Arc<Self>) {
		let task = tokio::spawn(Arc::clone(self).run_reconciler());
		self.tasks.lock().await.push(task);
	}

	async fn spawn_summary_report(self: &Arc<Self>) {
		let sup = Arc::clone(self);
		let delay = self.options.timing.summary_report_delay();
		let task = tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(delay) => {
					let cached: Vec<StreamStatus> = sup
						.snapshot()
						.await
						.into_iter()
						.filter(|s| s.preview_url.is_some())
						.collect();
					sup.ctx.notifier.send(report::dash_report(&cached));
				}
				_ = sup.wait_for_shutdown() => {}
			}
		});
		self.tasks.lock().await.push(task);
	}

	/// Status of every tracked stream, ordered by ID.
	pub async fn snapshot(&self) -> Vec<StreamStatus> {
		let senders: Vec<_> = self.streams.read().await.values().map(|h| h.sender()).collect();
		let mut out = Vec::with_capacity(senders.len());
		for tx in senders {
			if let Some(status) = stream::inspect(&tx).await {
				out.push(status);
			}
		}
		out
	}

	pub async fn tracked_ids(&self) -> Vec<StreamId> {
		self.streams.read().await.keys().cloned().collect()
	}

	/// Renders the answer to an operator command.
	pub async fn report(&self, command: Command) -> String {
		if command == Command::Help {
			return report::help_text(&self.options.timing, self.options.poll_interval);
		}
		let streams = self.snapshot().await;
		let view = FleetView {
			uptime: self.uptime(),
			timing: &self.options.timing,
			poll_interval: self.options.poll_interval,
			streams: &streams,
			desired: self.desired.read().await.len(),
			cached: self.ctx.store.len().await,
		};
		match command {
			Command::Info => report::info_report(&view),
			_ => report::status_summary(&view),
		}
	}

	/// Like [`report`](Self::report), but subject to the per-requester rate limit.
	pub async fn answer(&self, requester: &str, command: Command) -> String {
		if let Err(reply) = self.limiter.lock().await.check(&requester.to_string()) {
			tracing::debug!(requester, command = command.name(), "command rate limited");
			return reply;
		}
		self.report(command).await
	}

	/// Stops reconciliation and every stream. Credentials stay cached so the
	/// next boot resumes without provisioning again.
	pub async fn shutdown(&self) {
		if self.shutdown.send_replace(true) {
			return;
		}
		tracing::info!("shutting down");

		let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
		for task in &tasks {
			task.abort();
		}
		for task in tasks {
			let _ = task.await;
		}

		let _guard = self.reconcile_lock.lock().await;
		let active = self.snapshot().await.iter().filter(|s| s.is_active()).count();
		self.ctx.notifier.deliver(&report::shutdown_message(active)).await;

		let handles = std::mem::take(&mut *self.streams.write().await);
		let mut stopping = JoinSet::new();
		for (_, handle) in handles {
			stopping.spawn(handle.stop(StopReason::Shutdown));
		}
		while stopping.join_next().await.is_some() {}
		tracing::info!(stopped = active, "shutdown complete");
	}
}
