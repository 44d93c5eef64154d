use relayd_core::{CredentialCache, CredentialRecord, StreamId};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the credential cache. Every mutation is flushed to disk
/// before the lock is released.
#[derive(Clone)]
pub struct CredentialStore {
	cache: Arc<Mutex<CredentialCache>>,
}

impl CredentialStore {
	pub fn new(cache: CredentialCache) -> Self {
		Self {
			cache: Arc::new(Mutex::new(cache)),
		}
	}

	pub async fn get(&self, id: &StreamId) -> Option<CredentialRecord> {
		self.cache.lock().await.get(id).cloned()
	}

	pub async fn contains(&self, id: &StreamId) -> bool {
		self.cache.lock().await.contains(id)
	}

	pub async fn put(&self, id: StreamId, record: CredentialRecord) {
		let mut cache = self.cache.lock().await;
		cache.insert(id, record);
		flush(&cache);
	}

	pub async fn remove(&self, id: &StreamId) -> Option<CredentialRecord> {
		let mut cache = self.cache.lock().await;
		let removed = cache.remove(id);
		if removed.is_some() {
			flush(&cache);
		}
		removed
	}

	/// Drops every record whose ID fails `keep`. Returns how many went.
	pub async fn retain(&self, keep: impl FnMut(&StreamId) -> bool) -> usize {
		let mut cache = self.cache.lock().await;
		let dropped = cache.retain(keep);
		if dropped > 0 {
			flush(&cache);
		}
		dropped
	}

	pub async fn len(&self) -> usize {
		self.cache.lock().await.len()
	}

	pub async fn snapshot(&self) -> Vec<(StreamId, CredentialRecord)> {
		self.cache
			.lock()
			.await
			.iter()
			.map(|(id, rec)| (id.clone(), rec.clone()))
			.collect()
	}
}

fn flush(cache: &CredentialCache) {
	if let Err(e) = cache.save() {
		tracing::error!(error = %e, "failed to persist credential cache");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(handle: &str) -> CredentialRecord {
		CredentialRecord {
			live_handle: handle.into(),
			destination_url: format!("rtmps://dest/{}", handle),
			preview_url: "N/A".into(),
			status: "UNPUBLISHED".into(),
		}
	}

	#[tokio::test]
	async fn mutations_reach_disk() {
		let dir = std::env::temp_dir().join(format!("relayd-store-test-{}", std::process::id()));
		let path = dir.join("cache.json");
		let (cache, _) = CredentialCache::load(&path);
		let store = CredentialStore::new(cache);

		store.put("a".into(), record("1")).await;
		store.put("b".into(), record("2")).await;
		assert_eq!(CredentialCache::load(&path).0.len(), 2);

		store.remove(&"a".into()).await;
		let (reloaded, _) = CredentialCache::load(&path);
		assert!(!reloaded.contains(&"a".into()));
		assert_eq!(reloaded.get(&"b".into()), Some(&record("2")));

		assert_eq!(store.retain(|_| false).await, 1);
		assert!(CredentialCache::load(&path).0.is_empty());
		let _ = std::fs::remove_dir_all(&dir);
	}
}
