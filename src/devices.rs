//! Devices driven by this crate.

pub mod gmw90;
