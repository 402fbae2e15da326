//! HTTP handlers organized by surface.

pub mod health;
pub mod reconcile;

pub use health::*;
pub use reconcile::*;
