use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Stable identifier of a stream, derived from its name and source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
	/// Derives the ID from the trimmed `name|source` pair.
	///
	/// Identical descriptors always collapse to the same ID, so refetching an
	/// unchanged list never looks like an add or a remove.
	pub fn derive(name: &str, source: &str) -> Self {
		let combined = format!("{}|{}", name.trim(), source.trim());
		let digest = format!("{:x}", Sha256::digest(combined.as_bytes()));
		StreamId(format!("stream_{}", &digest[..8]))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for StreamId {
	fn from(value: &str) -> Self {
		StreamId(value.to_string())
	}
}

/// One entry of the desired-state list as the source API reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDescriptor {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default)]
	pub token: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
	pub id: StreamId,
	pub name: String,
	pub source_uri: String,
	pub provisioning_credential: String,
}

impl StreamDescriptor {
	pub fn new(name: &str, source_uri: &str, provisioning_credential: &str) -> Self {
		let name = name.trim();
		let source_uri = source_uri.trim();
		Self {
			id: StreamId::derive(name, source_uri),
			name: name.to_string(),
			source_uri: source_uri.to_string(),
			provisioning_credential: provisioning_credential.trim().to_string(),
		}
	}

	pub fn normalize(raw: &RawDescriptor) -> Self {
		let name = raw
			.name
			.as_deref()
			.map(str::trim)
			.filter(|n| !n.is_empty())
			.unwrap_or("Unnamed Stream");
		Self::new(
			name,
			raw.source.as_deref().unwrap_or(""),
			raw.token.as_deref().unwrap_or(""),
		)
	}
}

// The provisioning credential is an access token; keep it out of logs.
impl fmt::Debug for StreamDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StreamDescriptor")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("source_uri", &self.source_uri)
			.field("provisioning_credential", &"<redacted>")
			.finish()
	}
}

/// Normalizes a fetched list, collapsing duplicate IDs to the last entry.
pub fn normalize_all(raw: &[RawDescriptor]) -> Vec<StreamDescriptor> {
	let mut out: Vec<StreamDescriptor> = Vec::with_capacity(raw.len());
	for item in raw {
		let desc = StreamDescriptor::normalize(item);
		if let Some(existing) = out.iter_mut().find(|d| d.id == desc.id) {
			*existing = desc;
		} else {
			out.push(desc);
		}
	}
	out
}

/// Destination endpoint minted by the provisioning collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	pub live_handle: String,
	pub destination_url: String,
	#[serde(default = "not_available")]
	pub preview_url: String,
	#[serde(default = "unknown_status")]
	pub status: String,
}

pub fn not_available() -> String {
	"N/A".to_string()
}

fn unknown_status() -> String {
	"UNKNOWN".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
	Idle,
	Starting,
	Running,
	Restarting,
	Rotating,
	Failed,
}

impl StreamState {
	pub fn as_str(&self) -> &'static str {
		match self {
			StreamState::Idle => "idle",
			StreamState::Starting => "starting",
			StreamState::Running => "running",
			StreamState::Restarting => "restarting",
			StreamState::Rotating => "rotating",
			StreamState::Failed => "failed",
		}
	}

	pub fn is_running(&self) -> bool {
		matches!(self, StreamState::Running)
	}
}

impl fmt::Display for StreamState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Point-in-time view of one tracked stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
	pub id: StreamId,
	pub name: String,
	pub state: StreamState,
	pub pid: Option<u32>,
	pub uptime_secs: Option<u64>,
	pub preview_url: Option<String>,
	pub crashes: u32,
	pub rotations: u32,
	pub last_exit: Option<String>,
}

impl StreamStatus {
	pub fn is_active(&self) -> bool {
		self.state.is_running()
	}
}

/// Renders a duration as `1d 2h 3m 4s`, dropping zero components.
pub fn format_uptime(uptime: Duration) -> String {
	if uptime.is_zero() {
		return "Not active".to_string();
	}

	let total = uptime.as_secs();
	let days = total / 86_400;
	let hours = (total % 86_400) / 3600;
	let minutes = (total % 3600) / 60;
	let seconds = total % 60;

	let mut parts = Vec::new();
	if days > 0 {
		parts.push(format!("{}d", days));
	}
	if hours > 0 {
		parts.push(format!("{}h", hours));
	}
	if minutes > 0 {
		parts.push(format!("{}m", minutes));
	}
	if seconds > 0 || parts.is_empty() {
		parts.push(format!("{}s", seconds));
	}
	parts.join(" ")
}
