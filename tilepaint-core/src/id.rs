//! # IDs
//!
//! Process-unique identifiers, namespaced by a marker type. `Id<Node>` and `Id<Document>` may
//! share a numeric value, but can never be compared with each other.
//!
//! IDs are handed out eagerly by [`Id::default`], so a caller may allocate the ID of something
//! that does not exist yet (e.g. a layer that a queued action will create) and refer to it
//! before it is made.

use std::sync::atomic::{AtomicU64, Ordering};

// Next free value per namespace. Zero is never handed out, so `NonZeroU64` gives us a niche.
static COUNTERS: parking_lot::RwLock<Option<hashbrown::HashMap<std::any::TypeId, AtomicU64>>> =
    parking_lot::const_rwlock(None);

pub struct Id<T: 'static> {
    raw: std::num::NonZeroU64,
    _namespace: std::marker::PhantomData<fn() -> T>,
}

impl<T: 'static> Id<T> {
    /// Allocate `count` fresh IDs in one go.
    ///
    /// Order of the returned IDs is unspecified, only uniqueness is promised.
    pub fn many(count: usize) -> impl ExactSizeIterator<Item = Self> {
        let count_u64 = count as u64;
        let ty = std::any::TypeId::of::<T>();
        let first = {
            let read = COUNTERS.upgradable_read();
            if let Some(counter) = read.as_ref().and_then(|map| map.get(&ty)) {
                counter.fetch_add(count_u64, Ordering::Relaxed)
            } else {
                // First allocation in this namespace, happens a handful of times per run.
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                let map = write.get_or_insert_with(hashbrown::HashMap::new);
                map.entry(ty)
                    .or_insert_with(|| AtomicU64::new(1))
                    .fetch_add(count_u64, Ordering::Relaxed)
            }
        };
        assert!(
            first.checked_add(count_u64).is_some(),
            "{} ID space exhausted",
            std::any::type_name::<T>()
        );
        (0..count).map(move |offs| Self {
            // `first` starts at one and we checked for overflow above.
            raw: std::num::NonZeroU64::new(first + offs as u64)
                .unwrap_or(std::num::NonZeroU64::MIN),
            _namespace: std::marker::PhantomData,
        })
    }
    /// Raw numeric value. Only meaningful within this namespace and this process.
    #[must_use]
    pub fn get(self) -> u64 {
        self.raw.get()
    }
}

impl<T: 'static> Default for Id<T> {
    fn default() -> Self {
        let mut iter = Self::many(1);
        // `many(1)` yields exactly one element.
        match iter.next() {
            Some(id) => id,
            None => unreachable!(),
        }
    }
}
impl<T: 'static> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: 'static> Copy for Id<T> {}
impl<T: 'static> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T: 'static> Eq for Id<T> {}
impl<T: 'static> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: 'static> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}
impl<T: 'static> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}
impl<T: 'static> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "{short}#{}", self.raw)
    }
}
impl<T: 'static> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
/// Serialized as the bare number, for change notifications. There is intentionally no
/// `Deserialize`: an ID from another process is meaningless here.
impl<T: 'static> serde::Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw.get())
    }
}

#[cfg(test)]
mod test {
    use super::Id;

    #[test]
    fn zero_ids() {
        struct Namespace;
        assert_eq!(Id::<Namespace>::many(0).len(), 0);
        // Asking for nothing must not burn a value.
        assert_eq!(Id::<Namespace>::default().get(), 1);
    }
    #[test]
    fn unique() {
        struct Namespace;
        let mut ids: Vec<_> = Id::<Namespace>::many(512).chain(Id::many(512)).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len(), "had duplicate ids");
    }
    #[test]
    fn display_uses_short_type_name() {
        struct Widget;
        let id = Id::<Widget>::default();
        assert_eq!(id.to_string(), format!("Widget#{}", id.get()));
    }
}
