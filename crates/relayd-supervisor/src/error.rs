use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("relay program not found: {program}")]
	ProgramMissing { program: String },
	#[error("spawn failed: {0}")]
	Spawn(#[from] std::io::Error),
}

/// Failures from the destination-provisioning collaborator.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
	#[error("transport error: {0}")]
	Transport(String),
	#[error("api error: {0}")]
	Api(String),
	#[error("malformed response: {0}")]
	Parse(String),
	#[error("destination not ready after {attempts} attempts ({waited:?})")]
	Exhausted { attempts: u32, waited: Duration },
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
	#[error("transport error: {0}")]
	Transport(String),
	#[error("unexpected status {0}")]
	Status(u16),
	#[error("malformed response: {0}")]
	Parse(String),
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
	#[error("transport error: {0}")]
	Transport(String),
	#[error("rejected: {0}")]
	Rejected(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("relay program {program:?} is not installed; nothing can ever run")]
	RelayMissing { program: String },
	#[error("relay preflight failed: {0}")]
	Preflight(LaunchError),
	#[error("supervisor is shutting down")]
	ShuttingDown,
}

impl From<LaunchError> for SupervisorError {
	fn from(value: LaunchError) -> Self {
		match value {
			LaunchError::ProgramMissing { program } => SupervisorError::RelayMissing { program },
			other => SupervisorError::Preflight(other),
		}
	}
}
