//! Utility types, used throughout the crate.

/// A float which is never NaN or infinite, and thus can be `Eq` and `Hash`.
///
/// Node parameters are hashed to key the render cache, so every float that ends up in a
/// parameter goes through this type.
#[derive(Copy, Clone, PartialEq, PartialOrd, bytemuck::Zeroable, Debug, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct FiniteF32(f32);
impl FiniteF32 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    pub fn new(val: f32) -> Result<Self, FiniteF32Error> {
        if val.is_finite() {
            // Fold -0.0 into 0.0, otherwise equal values would hash differently.
            Ok(Self(val + 0.0))
        } else {
            Err(FiniteF32Error::NotFinite)
        }
    }
    /// Construct, clamping into `[min, max]` and mapping non-finite input to `min`.
    #[must_use]
    pub fn clamped(val: f32, min: f32, max: f32) -> Self {
        if val.is_finite() {
            Self(val.clamp(min, max) + 0.0)
        } else {
            Self(min)
        }
    }
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}
impl Default for FiniteF32 {
    fn default() -> Self {
        Self::ZERO
    }
}
impl TryFrom<f32> for FiniteF32 {
    type Error = FiniteF32Error;
    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
impl From<FiniteF32> for f32 {
    fn from(value: FiniteF32) -> Self {
        value.get()
    }
}
impl<'de> serde::Deserialize<'de> for FiniteF32 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f32::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiniteF32Error {
    #[error("not finite")]
    NotFinite,
}

// NaN is unrepresentable, so the partial relations are total.
impl Eq for FiniteF32 {}
#[allow(clippy::derive_ord_xor_partial_ord)]
impl Ord for FiniteF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl std::hash::Hash for FiniteF32 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.to_bits());
    }
}

/// Integer pixel rectangle. `width`/`height` of zero is an empty rect.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RectI {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
impl RectI {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
    /// Rect from `[0,0]` to `size`.
    #[must_use]
    pub const fn from_size(size: [u32; 2]) -> Self {
        Self::new(0, 0, size[0], size[1])
    }
    /// Construct from two inclusive-exclusive corners. Inverted corners produce an empty rect.
    #[must_use]
    pub fn from_corners(min: [i32; 2], max: [i32; 2]) -> Self {
        let width = u32::try_from(i64::from(max[0]) - i64::from(min[0])).unwrap_or(0);
        let height = u32::try_from(i64::from(max[1]) - i64::from(min[1])).unwrap_or(0);
        Self::new(min[0], min[1], width, height)
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
    #[must_use]
    pub fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }
    #[must_use]
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self::from_corners(
            [self.x.max(other.x), self.y.max(other.y)],
            [
                self.right().min(other.right()),
                self.bottom().min(other.bottom()),
            ],
        )
    }
    /// Smallest rect containing both. Empty rects are ignored.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_corners(
            [self.x.min(other.x), self.y.min(other.y)],
            [
                self.right().max(other.right()),
                self.bottom().max(other.bottom()),
            ],
        )
    }
    #[must_use]
    pub fn translated(&self, by: [i32; 2]) -> Self {
        Self::new(
            self.x.saturating_add(by[0]),
            self.y.saturating_add(by[1]),
            self.width,
            self.height,
        )
    }
}

/// A [`std::hash::Hasher`] backed by blake3, so content hashes are stable across runs and
/// builds (unlike `DefaultHasher`).
pub struct ContentHasher(blake3::Hasher);
impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }
    /// Hash a single value in one go.
    #[must_use]
    pub fn of<T: std::hash::Hash + ?Sized>(value: &T) -> u64 {
        let mut hasher = Self::new();
        value.hash(&mut hasher);
        std::hash::Hasher::finish(&hasher)
    }
}
impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
impl std::hash::Hasher for ContentHasher {
    fn finish(&self) -> u64 {
        let hash = self.0.finalize();
        let mut low = [0u8; 8];
        low.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(low)
    }
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}
