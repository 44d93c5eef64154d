//! # relayd-supervisor
//!
//! Keeps a fleet of relay processes in line with a periodically fetched
//! desired-state list.
//!
//! Each stream is owned by one actor task running the lifecycle state
//! machine (start, crash restart, scheduled credential rotation). The
//! [`Supervisor`] boots the fleet, reconciles it against the desired-state
//! source and shuts it down. External services are reached through the
//! traits in [`collab`] and the [`Launcher`] trait.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relayd_supervisor::{Collaborators, CommandLauncher, LogNotifier, Supervisor, SupervisorOptions};
//! use relayd_core::{CredentialCache, GlobalConfig};
//! use std::sync::Arc;
//! # use relayd_supervisor::collab::{DesiredStateSource, DestinationProvisioner};
//!
//! # async fn run(
//! #     source: Arc<dyn DesiredStateSource>,
//! #     provisioner: Arc<dyn DestinationProvisioner>,
//! # ) -> Result<(), relayd_supervisor::SupervisorError> {
//! let config = GlobalConfig::default();
//! let (cache, _) = CredentialCache::load(config.cache.resolved_path());
//! let sup = Supervisor::new(
//!     SupervisorOptions::from_config(&config),
//!     Collaborators {
//!         launcher: Arc::new(CommandLauncher::new(config.relay.clone())),
//!         provisioner,
//!         source,
//!         notifier: Arc::new(LogNotifier),
//!     },
//!     cache,
//! );
//! sup.boot().await?;
//! sup.spawn_reconciler().await;
//! sup.wait_for_shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod collab;
pub mod control;
pub mod error;
pub mod launcher;
pub mod monitor;
pub mod provision;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod store;
pub mod stream;
pub mod supervisor;
pub mod timer;

pub use collab::{LogNotifier, NotifySink};
pub use control::{Command, RateLimiter};
pub use error::{LaunchError, NotifyError, ProvisionError, SourceError, SupervisorError};
pub use launcher::{CommandLauncher, ExitReport, LaunchRequest, Launcher, RelayChild};
pub use monitor::ProcessHandle;
pub use provision::provision;
pub use retry::{RetryError, RetryPolicy};
pub use store::CredentialStore;
pub use stream::{StopReason, Transition};
pub use supervisor::{Collaborators, ReconcileSummary, Supervisor, SupervisorOptions};
pub use timer::TimerSlot;
