//! Request handlers for trigger and history endpoints.

mod runs;
mod trigger;

pub use runs::*;
pub use trigger::*;
