//! Query term handling.
//!
//! This module finds the sensitive terms of a query definition and puts the
//! tags returned by the tagging protocol back in their place.

pub mod classifier;
pub mod substitution;

pub use classifier::TermClassifier;
pub use substitution::{override_output_types, substitute};
