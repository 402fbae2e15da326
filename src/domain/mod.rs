//! Domain model for close reconciliation
//!
//! Close requests, validated proofs and pass outcomes. Nothing here performs I/O.

mod close;
mod outcome;
mod proof;

pub use close::*;
pub use outcome::*;
pub use proof::*;
