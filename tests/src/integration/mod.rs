//! # Integration Tests
//!
//! Each test starts a gateway on an ephemeral loopback port, with its route
//! table pointing at an axum backend that is also on loopback.
//!
//! ## Flows Tested
//!
//! 1. **Admission**: global, IP and feature tiers reject with their own codes
//! 2. **Authentication**: protected routes never reach a backend without a valid token
//! 3. **Routing and proxy**: envelopes for success, upstream errors, timeouts
//!    and unreachable backends
//! 4. **Backpressure**: a full queue makes callers wait, the ingress timeout bounds the wait

#[cfg(test)]
mod backpressure;
#[cfg(test)]
mod harness;
#[cfg(test)]
mod scenarios;
