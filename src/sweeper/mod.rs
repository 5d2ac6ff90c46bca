//! Expiry sweeper
//!
//! Periodically removes records whose TTL has elapsed, using the expiry
//! index the store maintains. The sweeper reaches the store only through
//! [`ExpirySource`]; it shares no state with request handling.

mod errors;
mod scheduler;
mod source;
mod sweeper;

pub use errors::{SweepError, SweepResult};
pub use scheduler::spawn_sweeper;
pub use source::{ExpireReport, ExpiryCandidate, ExpirySource};
pub use sweeper::{ExpirySweeper, SweepReport};
