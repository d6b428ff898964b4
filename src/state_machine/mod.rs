//! Change plan state machine - gates validation and deployment

mod machine;
mod transitions;

pub use machine::*;
pub use transitions::*;
