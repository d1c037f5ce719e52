//! Compact target decoding and proof-of-work checks.

pub mod difficulty;
pub mod validation;

pub use validation::{check_proof_of_work, validate_pow_header, PowError};
