//! Small special-purpose containers used on the search hot path.

pub mod bqueue;
pub mod heap;
