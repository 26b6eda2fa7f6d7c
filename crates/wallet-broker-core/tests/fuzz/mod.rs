//! Fuzz tests module
//!
//! Property-based testing using proptest:
//! - Typed-data canonicalization
//! - Deeplink encoding

pub mod links_fuzz;
