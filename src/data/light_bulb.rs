//! Lamp settings shown by the settings screen.
//!
//! Settings are held in memory only and reset when the process exits.

use crate::data::color::Color;
use crate::error::{Error, Result};

/// The user-facing settings of a lamp.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LightBulb {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Selected color.
    pub color: Color,
    /// Brightness slider position, 0.0 to 100.0.
    pub brightness: f32,
    /// Whether the LED is on.
    pub is_led_on: bool,
}

impl LightBulb {
    /// Minimum brightness slider position.
    pub const MIN_BRIGHTNESS: f32 = 0.0;
    /// Maximum brightness slider position.
    pub const MAX_BRIGHTNESS: f32 = 100.0;

    /// Create settings for a named lamp with default values.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the brightness, clamped to the slider range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for NaN.
    pub fn update_brightness(&mut self, position: f32) -> Result<()> {
        if position.is_nan() {
            return Err(Error::InvalidParameter {
                name: "brightness".to_string(),
                value: position.to_string(),
            });
        }

        self.brightness = position.clamp(Self::MIN_BRIGHTNESS, Self::MAX_BRIGHTNESS);
        Ok(())
    }

    /// Set the selected color.
    pub fn update_color(&mut self, color: Color) {
        self.color = color;
    }

    /// Record the LED on/off state.
    pub fn update_led_state(&mut self, is_on: bool) {
        self.is_led_on = is_on;
    }
}

impl Default for LightBulb {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            name: "Living Room Lamp".to_string(),
            color: Color::WHITE,
            brightness: 50.0,
            is_led_on: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let bulb = LightBulb::default();
        assert_eq!(bulb.id, "1");
        assert_eq!(bulb.color, Color::WHITE);
        assert_eq!(bulb.brightness, 50.0);
        assert!(!bulb.is_led_on);
    }

    #[test]
    fn test_brightness_is_clamped() {
        let mut bulb = LightBulb::new("2", "Desk");
        bulb.update_brightness(150.0).unwrap();
        assert_eq!(bulb.brightness, 100.0);
        bulb.update_brightness(-3.0).unwrap();
        assert_eq!(bulb.brightness, 0.0);
        bulb.update_brightness(42.5).unwrap();
        assert_eq!(bulb.brightness, 42.5);
    }

    #[test]
    fn test_brightness_rejects_nan() {
        let mut bulb = LightBulb::default();
        assert!(bulb.update_brightness(f32::NAN).is_err());
        assert_eq!(bulb.brightness, 50.0);
    }

    #[test]
    fn test_color_and_led_updates() {
        let mut bulb = LightBulb::default();
        bulb.update_color(Color::MAGENTA);
        bulb.update_led_state(true);
        assert_eq!(bulb.color, Color::MAGENTA);
        assert!(bulb.is_led_on);
    }
}
