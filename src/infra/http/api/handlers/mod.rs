//! API handlers organized by resource.

mod captures;
mod health;
mod objects;

pub use captures::*;
pub use health::*;
pub use objects::*;
