//! Domain models for versionsweep

mod backup;
mod error;
mod finding;
mod inventory;
mod plan;
mod scan;
mod session;
mod state;

pub use backup::*;
pub use error::*;
pub use finding::*;
pub use inventory::*;
pub use plan::*;
pub use scan::*;
pub use session::*;
pub use state::*;
