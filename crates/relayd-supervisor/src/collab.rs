//! Interfaces to the services the supervisor talks to but does not own.

use async_trait::async_trait;
use relayd_core::RawDescriptor;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NotifyError, ProvisionError, SourceError};

/// What a destination looks like after a resolve call. Fields stay `None`
/// until the provider has filled them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
	pub destination_url: Option<String>,
	pub preview_url: Option<String>,
	pub status: Option<String>,
}

#[async_trait]
pub trait DestinationProvisioner: Send + Sync {
	/// Creates a destination and returns its live handle.
	async fn create_destination(&self, name: &str, credential: &str) -> Result<String, ProvisionError>;

	async fn resolve_destination(
		&self,
		live_handle: &str,
		credential: &str,
	) -> Result<Resolution, ProvisionError>;
}

#[async_trait]
pub trait DesiredStateSource: Send + Sync {
	async fn fetch(&self) -> Result<Vec<RawDescriptor>, SourceError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no chat transport is set up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn notify(&self, text: &str) -> Result<(), NotifyError> {
		tracing::info!(target: "relayd::notify", "{}", text);
		Ok(())
	}
}

/// Fire-and-forget front for a [`Notifier`]. Delivery failures are logged
/// and never reach the caller.
#[derive(Clone)]
pub struct NotifySink {
	inner: Arc<dyn Notifier>,
	timeout: Duration,
}

impl NotifySink {
	pub fn new(inner: Arc<dyn Notifier>) -> Self {
		Self {
			inner,
			timeout: Duration::from_secs(15),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Queues `text` for delivery on a background task.
	pub fn send(&self, text: impl Into<String>) {
		let sink = self.clone();
		let text = text.into();
		tokio::spawn(async move {
			sink.deliver(&text).await;
		});
	}

	/// Delivers `text` and waits for the result, bounded by the sink timeout.
	pub async fn deliver(&self, text: &str) {
		match tokio::time::timeout(self.timeout, self.inner.notify(text)).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => tracing::warn!(error = %e, "notification failed"),
			Err(_) => tracing::warn!(timeout = ?self.timeout, "notification timed out"),
		}
	}
}

impl Default for NotifySink {
	fn default() -> Self {
		Self::new(Arc::new(LogNotifier))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	struct Failing(Mutex<u32>);

	#[async_trait]
	impl Notifier for Failing {
		async fn notify(&self, _text: &str) -> Result<(), NotifyError> {
			*self.0.lock().unwrap() += 1;
			Err(NotifyError::Transport("offline".into()))
		}
	}

	#[tokio::test]
	async fn failures_are_swallowed() {
		let failing = Arc::new(Failing(Mutex::new(0)));
		let sink = NotifySink::new(failing.clone());
		sink.deliver("hello").await;
		sink.deliver("again").await;
		assert_eq!(*failing.0.lock().unwrap(), 2);
	}

	struct Hanging;

	#[async_trait]
	impl Notifier for Hanging {
		async fn notify(&self, _text: &str) -> Result<(), NotifyError> {
			std::future::pending::<()>().await;
			Ok(())
		}
	}

	#[tokio::test(start_paused = true)]
	async fn slow_transport_is_bounded() {
		let sink = NotifySink::new(Arc::new(Hanging)).with_timeout(Duration::from_secs(3));
		let start = tokio::time::Instant::now();
		sink.deliver("stuck").await;
		assert_eq!(start.elapsed(), Duration::from_secs(3));
	}
}
