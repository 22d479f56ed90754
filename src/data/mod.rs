//! Data structures for lamp settings.

pub mod color;
pub mod light_bulb;

pub use color::Color;
pub use light_bulb::LightBulb;
