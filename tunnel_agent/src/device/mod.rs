//! Lease lifecycle of one tunnel interface: candidate selection, lease renewal
//! and applying the result to the interface.

mod manager;
mod reconfigure;

pub use manager::{Candidate, DeviceManager, ManagerSettings, RENEW_RETRY_INTERVAL, RenewError};
pub use reconfigure::{AppliedConfig, ReconfigureError, reconfigure};
