use crate::types::MaskColor;

/// Saturation used for every assigned color.
pub const SATURATION: f32 = 1.0;
/// Brightness used for every assigned color.
pub const VALUE: f32 = 1.0;

/// Produce `count` colors by dividing the hue circle into equal steps.
///
/// Color `i` has hue `i * 360 / count` degrees, so the sequence for a given
/// count never changes between calls.
pub fn distinct_colors(count: usize) -> Vec<MaskColor> {
    (0..count)
        .map(|i| hsv_to_rgb(i as f32 / count as f32, SATURATION, VALUE))
        .collect()
}

/// Convert HSV (hue in turns, `[0, 1)`) to an 8-bit RGB triple.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> MaskColor {
    let h = hue.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * f);
    let t = value * (1.0 - saturation * (1.0 - f));

    let (r, g, b) = match sector as u8 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };

    [to_channel(r), to_channel(g), to_channel(b)]
}

fn to_channel(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}
