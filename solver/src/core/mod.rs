//! Fundamental types of the solver: variables and literals.

pub use lit::*;

mod lit;
