use relayd_core::{not_available, CredentialRecord, StreamDescriptor};

use crate::collab::DestinationProvisioner;
use crate::error::ProvisionError;
use crate::retry::{RetryError, RetryPolicy};

/// Mints a destination for `desc` and polls until its URL is known.
///
/// Creation is attempted once. Resolution is polled under `policy`; running
/// out of attempts is a hard failure for this provisioning attempt.
pub async fn provision(
	provisioner: &dyn DestinationProvisioner,
	desc: &StreamDescriptor,
	policy: RetryPolicy,
) -> Result<CredentialRecord, ProvisionError> {
	let live_handle = provisioner
		.create_destination(&desc.name, &desc.provisioning_credential)
		.await?;
	tracing::debug!(stream = %desc.id, %live_handle, "destination created, resolving");

	let resolved = policy
		.run(|attempt| {
			let live_handle = live_handle.as_str();
			async move {
				let resolution = match provisioner
					.resolve_destination(live_handle, &desc.provisioning_credential)
					.await
				{
					Ok(resolution) => resolution,
					Err(e) => return Err::<Option<_>, ProvisionError>(e),
				};
				let ready = resolution
					.destination_url
					.as_deref()
					.is_some_and(|url| !url.trim().is_empty());
				if ready {
					return Ok(Some(resolution));
				}
				tracing::debug!(
					stream = %desc.id,
					attempt = attempt + 1,
					status = ?resolution.status,
					"destination url not ready"
				);
				Ok(None)
			}
		})
		.await;

	match resolved {
		Ok(resolution) => Ok(CredentialRecord {
			live_handle,
			destination_url: resolution.destination_url.unwrap_or_default().trim().to_string(),
			preview_url: resolution.preview_url.unwrap_or_else(not_available),
			status: resolution.status.unwrap_or_else(|| "UNKNOWN".to_string()),
		}),
		Err(RetryError::Exhausted { attempts, last_error }) => {
			if let Some(e) = &last_error {
				tracing::warn!(stream = %desc.id, error = %e, "last resolve attempt failed");
			}
			Err(ProvisionError::Exhausted {
				attempts,
				waited: policy.total_wait(),
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collab::Resolution;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	struct SlowProvider {
		ready_after: u32,
		resolves: AtomicU32,
	}

	#[async_trait]
	impl DestinationProvisioner for SlowProvider {
		async fn create_destination(&self, name: &str, _credential: &str) -> Result<String, ProvisionError> {
			Ok(format!("live-{}", name))
		}

		async fn resolve_destination(
			&self,
			live_handle: &str,
			_credential: &str,
		) -> Result<Resolution, ProvisionError> {
			let n = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
			if n < self.ready_after {
				return Ok(Resolution {
					status: Some("PREVIEW".into()),
					..Default::default()
				});
			}
			Ok(Resolution {
				destination_url: Some(format!("rtmps://dest/{}", live_handle)),
				preview_url: None,
				status: Some("UNPUBLISHED".into()),
			})
		}
	}

	#[tokio::test(start_paused = true)]
	async fn polls_until_url_appears() {
		let provider = SlowProvider {
			ready_after: 3,
			resolves: AtomicU32::new(0),
		};
		let desc = StreamDescriptor::new("news", "rtmp://x", "token");
		let record = provision(&provider, &desc, RetryPolicy::fixed(15, Duration::from_secs(2)))
			.await
			.unwrap();

		assert_eq!(record.live_handle, "live-news");
		assert_eq!(record.destination_url, "rtmps://dest/live-news");
		assert_eq!(record.preview_url, "N/A");
		assert_eq!(provider.resolves.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_after_bound() {
		let provider = SlowProvider {
			ready_after: u32::MAX,
			resolves: AtomicU32::new(0),
		};
		let desc = StreamDescriptor::new("news", "rtmp://x", "token");
		let err = provision(&provider, &desc, RetryPolicy::fixed(4, Duration::from_secs(2)))
			.await
			.unwrap_err();

		assert!(matches!(err, ProvisionError::Exhausted { attempts: 4, .. }));
		assert_eq!(provider.resolves.load(Ordering::SeqCst), 4);
	}
}
