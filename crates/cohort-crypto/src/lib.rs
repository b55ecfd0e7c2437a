//! Content addressing for Cohort.
//!
//! Study configurations are versioned by hash: the [`ContentAddresser`]
//! turns a configuration's canonical serialization into a
//! [`ConfigVersion`](cohort_types::ConfigVersion), which both names the
//! stored config blob and detects configuration changes.
//!
//! All hashing wraps BLAKE3. No custom cryptography.

pub mod hasher;

pub use hasher::{ContentAddresser, HasherError};
