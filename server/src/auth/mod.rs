//! Authentication for trigger routes.

mod middleware;

pub use middleware::TriggerAuth;
