//! Ports for the API Gateway.

pub mod outbound;

pub use outbound::{Clock, ManualClock, SystemClock};
