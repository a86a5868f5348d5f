use image::Rgb;

/// Viridis sampled at eleven evenly spaced stops.
const VIRIDIS: [[u8; 3]; 11] = [
    [68, 1, 84],
    [72, 36, 117],
    [65, 68, 135],
    [53, 95, 141],
    [42, 120, 142],
    [33, 145, 140],
    [34, 168, 132],
    [68, 191, 112],
    [122, 209, 81],
    [189, 223, 38],
    [253, 231, 37],
];

/// Maps `t` in `[0, 1]` onto viridis, interpolating linearly between stops.
pub fn viridis(t: f32) -> Rgb<u8> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (VIRIDIS.len() - 1) as f32;
    let lo = (pos.floor() as usize).min(VIRIDIS.len() - 1);
    let hi = (lo + 1).min(VIRIDIS.len() - 1);
    let frac = pos - lo as f32;

    let mix = |c: usize| {
        let a = VIRIDIS[lo][c] as f32;
        let b = VIRIDIS[hi][c] as f32;
        (a + (b - a) * frac).round() as u8
    };
    Rgb([mix(0), mix(1), mix(2)])
}
