//! # CampfireNet Testkit
//!
//! Testing utilities for CampfireNet.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a root node with delegated members, wired over in-memory links
//! - **Generators**: Proptest strategies for keys, permissions, and valid chains
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use campfire_testkit::fixtures::{connect, TestNetwork};
//!
//! # async fn example() {
//! let net = TestNetwork::new(2);
//! let (_a, _b) = connect(net.node(0), net.node(1));
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use campfire_testkit::generators::{chain_from_params, ChainParams};
//!
//! proptest! {
//!     #[test]
//!     fn generated_chains_validate(params: ChainParams) {
//!         let chain = chain_from_params(&params);
//!         prop_assert!(campfire_core::validate_trust_chain(&chain).is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{connect, eventually, fast_sync_config, seeded_identity, TestNetwork};
pub use generators::{chain_from_params, ChainParams};
