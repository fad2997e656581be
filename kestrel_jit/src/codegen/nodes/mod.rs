//! Node lowerings, grouped by kind.

pub mod arith;
pub mod calls;
pub mod control;
pub mod conversions;
pub mod memory;
pub mod values;
