use crate::types::{CredentialRecord, StreamId};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("failed to write cache {path}: {source}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to encode cache: {0}")]
	Encode(#[from] serde_json::Error),
}

/// What [`CredentialCache::load`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
	Missing,
	Empty,
	Loaded(usize),
	/// The file could not be used. It was moved to `backup` when possible.
	Corrupted {
		reason: String,
		backup: Option<PathBuf>,
	},
}

/// Stream ID → credential record, flushed to a JSON file on every save.
///
/// A missing or unreadable file never fails the load: it degrades to an
/// empty cache so every stream gets provisioned again.
#[derive(Debug, Clone, Default)]
pub struct CredentialCache {
	path: Option<PathBuf>,
	records: BTreeMap<StreamId, CredentialRecord>,
}

impl CredentialCache {
	/// A cache that never touches disk.
	pub fn in_memory() -> Self {
		Self::default()
	}

	pub fn load(path: impl Into<PathBuf>) -> (Self, LoadOutcome) {
		let path = path.into();
		let mut cache = Self {
			path: Some(path.clone()),
			records: BTreeMap::new(),
		};

		let content = match fs::read_to_string(&path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return (cache, LoadOutcome::Missing);
			}
			Err(e) => {
				let outcome = LoadOutcome::Corrupted {
					reason: e.to_string(),
					backup: None,
				};
				return (cache, outcome);
			}
		};

		if content.trim().is_empty() {
			return (cache, LoadOutcome::Empty);
		}

		match serde_json::from_str::<BTreeMap<StreamId, CredentialRecord>>(&content) {
			Ok(records) if records.is_empty() => (cache, LoadOutcome::Empty),
			Ok(records) => {
				let n = records.len();
				cache.records = records;
				(cache, LoadOutcome::Loaded(n))
			}
			Err(e) => {
				let backup = backup_corrupted(&path);
				(
					cache,
					LoadOutcome::Corrupted {
						reason: e.to_string(),
						backup,
					},
				)
			}
		}
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	pub fn get(&self, id: &StreamId) -> Option<&CredentialRecord> {
		self.records.get(id)
	}

	pub fn contains(&self, id: &StreamId) -> bool {
		self.records.contains_key(id)
	}

	pub fn insert(&mut self, id: StreamId, record: CredentialRecord) -> Option<CredentialRecord> {
		self.records.insert(id, record)
	}

	pub fn remove(&mut self, id: &StreamId) -> Option<CredentialRecord> {
		self.records.remove(id)
	}

	/// Keeps only the records whose IDs satisfy `keep`. Returns how many were dropped.
	pub fn retain(&mut self, mut keep: impl FnMut(&StreamId) -> bool) -> usize {
		let before = self.records.len();
		self.records.retain(|id, _| keep(id));
		before - self.records.len()
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&StreamId, &CredentialRecord)> {
		self.records.iter()
	}

	/// Writes the whole map through a synced temp file and an atomic rename.
	pub fn save(&self) -> Result<(), CacheError> {
		let Some(path) = &self.path else {
			return Ok(());
		};

		let data = serde_json::to_vec_pretty(&self.records)?;
		let write_err = |source| CacheError::Write {
			path: path.clone(),
			source,
		};

		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(write_err)?;
		}

		let mut tmp_name = path.as_os_str().to_owned();
		tmp_name.push(".tmp");
		let tmp = PathBuf::from(tmp_name);

		let mut file = fs::File::create(&tmp).map_err(write_err)?;
		file.write_all(&data).map_err(write_err)?;
		file.sync_all().map_err(write_err)?;
		drop(file);
		fs::rename(&tmp, path).map_err(write_err)?;
		sync_parent(path).map_err(write_err)?;
		Ok(())
	}
}

/// Flushes the directory entry so a completed rename survives power loss.
fn sync_parent(path: &Path) -> std::io::Result<()> {
	let parent = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new("."),
	};
	fs::File::open(parent)?.sync_all()
}

fn backup_corrupted(path: &Path) -> Option<PathBuf> {
	let stamp = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0);
	let mut name = path.as_os_str().to_owned();
	name.push(format!(".corrupted.{}", stamp));
	let backup = PathBuf::from(name);
	fs::rename(path, &backup).ok().map(|_| backup)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir(name: &str) -> PathBuf {
		let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!(
			"relayd-cache-test-{}-{}-{}",
			std::process::id(),
			n,
			name
		));
		let _ = fs::create_dir_all(&dir);
		dir
	}

	fn record(n: usize) -> CredentialRecord {
		CredentialRecord {
			live_handle: format!("live-{}", n),
			destination_url: format!("rtmps://dest/{}", n),
			preview_url: if n % 2 == 0 { format!("https://dash/{}", n) } else { "N/A".into() },
			status: "UNPUBLISHED".into(),
		}
	}

	#[test]
	fn missing_file_loads_empty() {
		let dir = temp_dir("missing");
		let (cache, outcome) = CredentialCache::load(dir.join("cache.json"));
		assert_eq!(outcome, LoadOutcome::Missing);
		assert!(cache.is_empty());
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn whitespace_file_loads_empty() {
		let dir = temp_dir("blank");
		let path = dir.join("cache.json");
		fs::write(&path, "  \n").unwrap();
		let (cache, outcome) = CredentialCache::load(&path);
		assert_eq!(outcome, LoadOutcome::Empty);
		assert!(cache.is_empty());
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn save_and_reload_round_trips() {
		let dir = temp_dir("roundtrip");
		let path = dir.join("nested").join("cache.json");
		let (mut cache, _) = CredentialCache::load(&path);
		for n in 0..5 {
			cache.insert(StreamId::from(format!("stream_{:08}", n).as_str()), record(n));
		}
		cache.save().unwrap();
		let first = fs::read(&path).unwrap();

		let (reloaded, outcome) = CredentialCache::load(&path);
		assert_eq!(outcome, LoadOutcome::Loaded(5));
		for (id, rec) in cache.iter() {
			assert_eq!(reloaded.get(id), Some(rec));
		}

		reloaded.save().unwrap();
		assert_eq!(fs::read(&path).unwrap(), first);
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn save_leaves_only_the_cache_file() {
		let dir = temp_dir("durable");
		let path = dir.join("cache.json");
		let (mut cache, _) = CredentialCache::load(&path);
		cache.insert(StreamId::from("stream_00000001"), record(1));
		cache.save().unwrap();

		let names: Vec<_> = fs::read_dir(&dir)
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec!["cache.json".to_string()]);
		sync_parent(&path).unwrap();
		sync_parent(Path::new("cache.json")).unwrap();
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn corrupted_file_is_backed_up() {
		let dir = temp_dir("corrupt");
		let path = dir.join("cache.json");
		fs::write(&path, "{ not json").unwrap();

		let (cache, outcome) = CredentialCache::load(&path);
		assert!(cache.is_empty());
		match outcome {
			LoadOutcome::Corrupted { backup: Some(backup), .. } => {
				assert!(backup.exists());
				assert!(!path.exists());
			}
			other => panic!("expected corrupted outcome, got {:?}", other),
		}
		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn retain_and_remove() {
		let mut cache = CredentialCache::in_memory();
		cache.insert("a".into(), record(1));
		cache.insert("b".into(), record(2));
		assert_eq!(cache.retain(|id| id.as_str() == "a"), 1);
		assert!(cache.contains(&"a".into()));
		assert!(cache.remove(&"a".into()).is_some());
		assert!(cache.is_empty());
		assert!(cache.save().is_ok());
	}
}
