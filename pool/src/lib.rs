//! Lazy-ping session pool.
//!
//! A fixed set of remote sessions handed out to callers, kept alive by an
//! externally driven maintenance pass that only pings sessions whose locally
//! tracked activity is older than the ping interval.
//!
//! The default [`FreshnessPolicy::OnCheckout`] refreshes that timestamp on
//! every checkout, which lets a server-side deleted session dodge
//! maintenance for as long as it keeps being checked out.
//! [`FreshnessPolicy::OnConfirmedUse`] only counts confirmed successful use.

pub mod config;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod remote;

pub use config::{FreshnessPolicy, PoolConfig};
pub use error::{PoolError, RemoteError};
pub use maintenance::{MaintenanceTask, run_maintenance};
pub use model::{MaintenanceReport, PoolStatus, SessionLocation, SessionSnapshot};
pub use pool::{Pool, PooledSession};
pub use remote::RemoteService;
pub use remote::memory::InMemoryRemote;
