use crate::util::FiniteF32;

/// A premultiplied, 8-bit-per-channel RGBA pixel. The unit of storage in every tile.
///
/// Transparent pixels are always stored as all-zero; [`Rgba8::from_straight`] and the float
/// conversions uphold this, so `==` on pixels compares visible content.
#[repr(C)]
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Default,
    Debug,
    bytemuck::Pod,
    bytemuck::Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}
impl Rgba8 {
    pub const TRANSPARENT: Self = Self::premultiplied(0, 0, 0, 0);
    pub const BLACK: Self = Self::premultiplied(0, 0, 0, 255);
    pub const WHITE: Self = Self::premultiplied(255, 255, 255, 255);

    /// Build from channels that are already premultiplied by alpha.
    #[must_use]
    pub const fn premultiplied(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
    /// Build from straight (non-premultiplied) channels.
    #[must_use]
    pub fn from_straight(r: u8, g: u8, b: u8, a: u8) -> Self {
        let mul = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
        Self::premultiplied(mul(r), mul(g), mul(b), a)
    }
    #[must_use]
    pub fn to_straight(self) -> [u8; 4] {
        if self.a == 0 {
            return [0; 4];
        }
        let div = |c: u8| ((u16::from(c) * 255 + u16::from(self.a) / 2) / u16::from(self.a)).min(255) as u8;
        [div(self.r), div(self.g), div(self.b), self.a]
    }
    #[must_use]
    pub fn is_transparent(self) -> bool {
        self.a == 0
    }
    /// Premultiplied channels in `[0, 1]`.
    #[must_use]
    pub fn to_f32(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|c| f32::from(c) / 255.0)
    }
    /// From premultiplied channels in `[0, 1]`. Out of range values are clamped, and color is
    /// clamped to not exceed alpha.
    #[must_use]
    pub fn from_f32([r, g, b, a]: [f32; 4]) -> Self {
        let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        let a = quantize(a);
        if a == 0 {
            return Self::TRANSPARENT;
        }
        Self::premultiplied(
            quantize(r).min(a),
            quantize(g).min(a),
            quantize(b).min(a),
            a,
        )
    }
    /// Largest per-channel difference, used as the flood fill tolerance metric.
    #[must_use]
    pub fn max_channel_distance(self, other: Self) -> u8 {
        [
            self.r.abs_diff(other.r),
            self.g.abs_diff(other.g),
            self.b.abs_diff(other.b),
            self.a.abs_diff(other.a),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
    /// Average of a block of pixels, as used to build lower resolution levels.
    #[must_use]
    pub fn average(pixels: impl IntoIterator<Item = Self>) -> Self {
        let mut sum = [0u32; 4];
        let mut count = 0u32;
        for px in pixels {
            sum[0] += u32::from(px.r);
            sum[1] += u32::from(px.g);
            sum[2] += u32::from(px.b);
            sum[3] += u32::from(px.a);
            count += 1;
        }
        if count == 0 {
            return Self::TRANSPARENT;
        }
        let avg = sum.map(|c| ((c + count / 2) / count) as u8);
        if avg[3] == 0 {
            Self::TRANSPARENT
        } else {
            Self::premultiplied(avg[0], avg[1], avg[2], avg[3])
        }
    }
}

/// The space blending math is performed in. Storage is always sRGB-encoded.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// Blend the stored, sRGB-encoded values directly.
    #[default]
    Srgb,
    /// Decode to linear light, blend, re-encode.
    LinearSrgb,
}
impl ColorSpace {
    /// Premultiplied stored pixel into premultiplied working-space floats.
    #[must_use]
    pub fn decode(self, px: Rgba8) -> [f32; 4] {
        let [r, g, b, a] = px.to_f32();
        match self {
            Self::Srgb => [r, g, b, a],
            Self::LinearSrgb => {
                if a <= 0.0 {
                    return [0.0; 4];
                }
                // Transfer functions apply to straight color.
                let lin = |c: f32| srgb_to_linear(c / a) * a;
                [lin(r), lin(g), lin(b), a]
            }
        }
    }
    /// Inverse of [`Self::decode`].
    #[must_use]
    pub fn encode(self, [r, g, b, a]: [f32; 4]) -> Rgba8 {
        match self {
            Self::Srgb => Rgba8::from_f32([r, g, b, a]),
            Self::LinearSrgb => {
                if a <= 0.0 {
                    return Rgba8::TRANSPARENT;
                }
                let enc = |c: f32| linear_to_srgb((c / a).clamp(0.0, 1.0)) * a;
                Rgba8::from_f32([enc(r), enc(g), enc(b), a])
            }
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}
fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// A 4x5 row-major color matrix, operating on straight RGBA in `[0, 1]`.
/// Column 5 is an additive offset.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct ColorMatrix(pub [FiniteF32; 20]);
impl ColorMatrix {
    #[must_use]
    pub fn from_rows(rows: [[f32; 5]; 4]) -> Self {
        let mut out = [FiniteF32::ZERO; 20];
        for (dst, src) in out.iter_mut().zip(rows.iter().flatten()) {
            *dst = FiniteF32::clamped(*src, -64.0, 64.0);
        }
        Self(out)
    }
    #[must_use]
    pub fn identity() -> Self {
        Self::from_rows([
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ])
    }
    /// Rec. 709 luma.
    #[must_use]
    pub fn grayscale() -> Self {
        let (r, g, b) = (0.2126, 0.7152, 0.0722);
        Self::from_rows([
            [r, g, b, 0.0, 0.0],
            [r, g, b, 0.0, 0.0],
            [r, g, b, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ])
    }
    #[must_use]
    pub fn brightness(offset: f32) -> Self {
        Self::from_rows([
            [1.0, 0.0, 0.0, 0.0, offset],
            [0.0, 1.0, 0.0, 0.0, offset],
            [0.0, 0.0, 1.0, 0.0, offset],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ])
    }
    #[must_use]
    pub fn invert() -> Self {
        Self::from_rows([
            [-1.0, 0.0, 0.0, 0.0, 1.0],
            [0.0, -1.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0, 0.0, 1.0],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ])
    }
    /// `self` applied after `first`.
    #[must_use]
    pub fn after(&self, first: &Self) -> Self {
        let a = |r: usize, c: usize| self.0[r * 5 + c].get();
        let b = |r: usize, c: usize| first.0[r * 5 + c].get();
        let mut rows = [[0.0f32; 5]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, out) in row.iter_mut().enumerate() {
                let mut sum: f32 = (0..4).map(|k| a(r, k) * b(k, c)).sum();
                if c == 4 {
                    sum += a(r, 4);
                }
                *out = sum;
            }
        }
        Self::from_rows(rows)
    }
    #[must_use]
    pub fn apply(&self, px: Rgba8) -> Rgba8 {
        let [r, g, b, a] = px.to_straight().map(|c| f32::from(c) / 255.0);
        let m = |i: usize| self.0[i].get();
        let row = |i: usize| m(i * 5) * r + m(i * 5 + 1) * g + m(i * 5 + 2) * b + m(i * 5 + 3) * a + m(i * 5 + 4);
        let out_a = row(3).clamp(0.0, 1.0);
        Rgba8::from_f32([
            row(0).clamp(0.0, 1.0) * out_a,
            row(1).clamp(0.0, 1.0) * out_a,
            row(2).clamp(0.0, 1.0) * out_a,
            out_a,
        ])
    }
}
impl Default for ColorMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn premultiply_roundtrip_opaque() {
        let px = Rgba8::from_straight(10, 200, 30, 255);
        assert_eq!(px.to_straight(), [10, 200, 30, 255]);
    }
    #[test]
    fn transparent_is_normalized() {
        assert_eq!(Rgba8::from_straight(255, 0, 0, 0), Rgba8::TRANSPARENT);
        assert_eq!(Rgba8::from_f32([1.0, 1.0, 0.0, 0.0]), Rgba8::TRANSPARENT);
    }
    #[test]
    fn linear_roundtrip() {
        for v in [0u8, 1, 17, 128, 200, 255] {
            let px = Rgba8::premultiplied(v, v, v, 255);
            let cs = ColorSpace::LinearSrgb;
            assert_eq!(cs.encode(cs.decode(px)), px);
        }
    }
    #[test]
    fn identity_matrix_is_noop() {
        let px = Rgba8::from_straight(12, 34, 56, 255);
        assert_eq!(ColorMatrix::identity().apply(px), px);
        let inv = ColorMatrix::invert();
        assert_eq!(inv.after(&inv).apply(px), px);
    }
    #[test]
    fn average_of_block() {
        let px = Rgba8::average([Rgba8::WHITE, Rgba8::TRANSPARENT]);
        assert_eq!(px, Rgba8::premultiplied(128, 128, 128, 128));
    }
}
