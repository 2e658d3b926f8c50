//! # Gateway Test Suite
//!
//! End-to-end tests that run a real gateway against loopback backends.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── mod.rs           # Module declarations
//!     ├── harness.rs       # Shared harness: backends, config, token minting
//!     ├── scenarios.rs     # Auth, routing, proxy and rate limit outcomes
//!     └── backpressure.rs  # Bounded queue and ingress timeout behaviour
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p gateway-tests
//! cargo test -p gateway-tests integration::scenarios::
//! ```

pub mod integration;
