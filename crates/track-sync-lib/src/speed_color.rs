//! Speed to colour mapping for the gradient overlay
//!
//! Speeds are normalised into `[0, 1]`, pushed through a symmetric S-curve that
//! compresses mid-range tones, and interpolated between a fixed slow and fast colour.

use serde::{Deserialize, Serialize};

/// Colour of the slowest segments
pub const SLOW_COLOR: Rgb = Rgb::new(37, 99, 235);

/// Colour of the fastest segments
pub const FAST_COLOR: Rgb = Rgb::new(239, 68, 68);

/// Exponent of the S-curve
pub const CURVE_EXPONENT: f64 = 2.5;

/// 8-bit RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// CSS hex notation, e.g. `#2563eb`
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Linear interpolation per channel, `t` in `[0, 1]`
    pub fn lerp(&self, other: &Rgb, t: f64) -> Rgb {
        let mix = |a: u8, b: u8| -> u8 {
            let v = a as f64 + (b as f64 - a as f64) * t;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
        )
    }
}

/// Colour stops along a line's normalised length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStops {
    /// `(position, colour)` pairs with positions ascending in `[0, 1]`
    pub stops: Vec<(f64, Rgb)>,
}

impl GradientStops {
    /// Degenerate gradient of a single colour
    pub fn flat(color: Rgb) -> Self {
        Self {
            stops: vec![(0.0, color), (1.0, color)],
        }
    }

    /// Whether every stop has the same colour
    pub fn is_flat(&self) -> bool {
        self.stops.windows(2).all(|w| w[0].1 == w[1].1)
    }
}

/// Symmetric S-curve around 0.5
#[inline]
fn s_curve(t: f64) -> f64 {
    if t < 0.5 {
        0.5 * (2.0 * t).powf(CURVE_EXPONENT)
    } else {
        1.0 - 0.5 * (2.0 * (1.0 - t)).powf(CURVE_EXPONENT)
    }
}

/// Colour for `speed` on a scale from `min_speed` to `max_speed`
pub fn color_for(speed: f64, max_speed: f64, min_speed: f64) -> Rgb {
    if max_speed <= min_speed {
        return SLOW_COLOR;
    }
    let t = ((speed - min_speed) / (max_speed - min_speed)).clamp(0.0, 1.0);
    // NaN speeds fall back to the slow end
    let t = if t.is_nan() { 0.0 } else { t };
    SLOW_COLOR.lerp(&FAST_COLOR, s_curve(t))
}

/// One stop per segment, evenly spread over the line's length
pub fn gradient_stops(segment_speeds: &[f64], max_speed: f64, min_speed: f64) -> GradientStops {
    if segment_speeds.is_empty() || max_speed <= 0.0 {
        return GradientStops::flat(SLOW_COLOR);
    }

    let n = segment_speeds.len();
    if n == 1 {
        return GradientStops::flat(color_for(segment_speeds[0], max_speed, min_speed));
    }

    let stops = segment_speeds
        .iter()
        .enumerate()
        .map(|(i, &speed)| {
            let position = i as f64 / (n - 1) as f64;
            (position, color_for(speed, max_speed, min_speed))
        })
        .collect();
    GradientStops { stops }
}
