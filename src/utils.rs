//! Utility functions for the lumos-ble crate.

use crate::data::Color;

/// Convert HSV to RGB.
///
/// # Arguments
///
/// * `hue` - Hue in degrees, wrapped into 0..360
/// * `saturation` - Saturation, clamped to 0.0..=1.0
/// * `value` - Value, clamped to 0.0..=1.0
///
/// # Example
///
/// ```
/// use lumos_ble::{hsv_to_rgb, Color};
///
/// assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Color::RED);
/// assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Color::BLUE);
/// ```
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Color {
    let h = hue.rem_euclid(360.0);
    let s = saturation.clamp(0.0, 1.0);
    let v = value.clamp(0.0, 1.0);

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_byte = |channel: f32| ((channel + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Color::new(to_byte(r), to_byte(g), to_byte(b))
}

/// Pick a color from a circular color wheel.
///
/// `(x, y)` is the touch point in a square of side `2 * radius` with the
/// origin at the top-left. Hue follows the angle from the center and
/// saturation grows with the distance from the center. Returns `None` for
/// points outside the wheel and for non-finite coordinates.
pub fn color_at_wheel_point(x: f32, y: f32, radius: f32) -> Option<Color> {
    if radius <= 0.0 || !radius.is_finite() {
        return None;
    }

    let (cx, cy) = (radius, radius);
    let distance = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
    if !distance.is_finite() || distance > radius {
        return None;
    }

    let angle = (cy - y).atan2(x - cx).to_degrees();
    let hue = (angle + 360.0) % 360.0;

    Some(hsv_to_rgb(hue, distance / radius, 1.0))
}

/// Map a brightness slider position (0 to 100) to a byte.
#[inline]
pub fn brightness_to_byte(position: f32) -> u8 {
    if position.is_nan() {
        return 0;
    }
    (position.clamp(0.0, 100.0) / 100.0 * 255.0).round() as u8
}
