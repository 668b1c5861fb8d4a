use crate::color::{ColorSpace, Rgba8};
use crate::util::FiniteF32;

#[derive(
    strum::AsRefStr,
    strum::EnumIter,
    strum::EnumString,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    Overlay,
    /// Removes destination coverage by the source's alpha. Color of the source is ignored.
    Erase,
}

/// Blend mode for an object, including a mode, opacity modulate, and alpha clip
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Blend {
    pub mode: BlendMode,
    pub opacity: FiniteF32,
    /// If alpha clip enabled, it should not affect background alpha, krita style!
    pub alpha_clip: bool,
}
impl Default for Blend {
    fn default() -> Self {
        Self {
            mode: BlendMode::default(),
            opacity: FiniteF32::ONE,
            alpha_clip: false,
        }
    }
}
impl Blend {
    #[must_use]
    pub fn with_mode(mode: BlendMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
    /// Composite a single source pixel over a destination pixel.
    #[must_use]
    pub fn pixel(&self, space: ColorSpace, src: Rgba8, dst: Rgba8) -> Rgba8 {
        let opacity = self.opacity.get().clamp(0.0, 1.0);
        if src.is_transparent() || opacity <= 0.0 {
            return dst;
        }
        // Fast path, the overwhelmingly common case while painting.
        if self.mode == BlendMode::Normal && !self.alpha_clip && opacity >= 1.0 && src.a == 255 {
            return src;
        }
        let s = space.decode(src).map(|c| c * opacity);
        let d = space.decode(dst);
        space.encode(blend_premul(self.mode, self.alpha_clip, s, d))
    }
    /// Composite `src` over every pixel of `dst`. Both slices must be the same length.
    pub fn rows(&self, space: ColorSpace, src: &[Rgba8], dst: &mut [Rgba8]) {
        debug_assert_eq!(src.len(), dst.len());
        for (d, s) in dst.iter_mut().zip(src) {
            *d = self.pixel(space, *s, *d);
        }
    }
}

/// Porter-Duff source-over with a separable color function, on premultiplied floats.
fn blend_premul(mode: BlendMode, clip: bool, s: [f32; 4], d: [f32; 4]) -> [f32; 4] {
    let (sa, da) = (s[3], d[3]);
    if mode == BlendMode::Erase {
        // Destination-out. Clip makes no sense here, ignore it.
        let keep = 1.0 - sa;
        return d.map(|c| c * keep);
    }
    // Straight colors for the mixing functions.
    let straight = |px: [f32; 4], i: usize| if px[3] > 0.0 { px[i] / px[3] } else { 0.0 };
    let mix = |cs: f32, cd: f32| -> f32 {
        match mode {
            BlendMode::Normal | BlendMode::Erase => cs,
            BlendMode::Add => (cs + cd).min(1.0),
            BlendMode::Multiply => cs * cd,
            BlendMode::Screen => cs + cd - cs * cd,
            BlendMode::Overlay => {
                if cd <= 0.5 {
                    2.0 * cs * cd
                } else {
                    1.0 - 2.0 * (1.0 - cs) * (1.0 - cd)
                }
            }
        }
    };
    let mut out = [0.0; 4];
    for i in 0..3 {
        let cs = straight(s, i);
        let cd = straight(d, i);
        // W3C compositing: the mixed color only applies where both are present.
        let mixed = (1.0 - da) * cs + da * mix(cs, cd);
        out[i] = sa * mixed + (1.0 - sa) * d[i];
    }
    if clip {
        // Keep destination coverage, and only tint where there is destination.
        for i in 0..3 {
            out[i] = d[i] + (out[i] - d[i]) * da;
        }
        out[3] = da;
    } else {
        out[3] = sa + da * (1.0 - sa);
    }
    out
}
