//! Infrastructure layer for close reconciliation
//!
//! Contains:
//! - Error taxonomy shared by every component
//! - Trait seams for the ledger and the proof oracle
//! - Bounded retry policy for submissions

mod error;
mod retry;
mod traits;

pub use error::*;
pub use retry::{Retry, RetryConfig, RetryResult};
pub use traits::*;
