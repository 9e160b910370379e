//! Key handles and the hash/equality strategies a [`super::HashTable`] is parameterised by.

use crate::attribute::AttributeId;
use crate::primitives::arena::ArenaPtr;

/// Opaque handle usable as a table key.
///
/// Keys are small `Copy` values that compare by identity and expose a
/// 64-bit handle for the default pointer hash.
pub trait TableKey: Copy + Eq {
    /// Returns the 64-bit handle hashed by [`PointerHash`].
    fn handle(&self) -> u64;
}

impl TableKey for u64 {
    fn handle(&self) -> u64 {
        *self
    }
}

impl TableKey for u32 {
    fn handle(&self) -> u64 {
        u64::from(*self)
    }
}

impl TableKey for usize {
    fn handle(&self) -> u64 {
        *self as u64
    }
}

impl TableKey for AttributeId {
    fn handle(&self) -> u64 {
        u64::from(self.raw())
    }
}

impl<T> TableKey for ArenaPtr<T> {
    fn handle(&self) -> u64 {
        u64::from(self.offset())
    }
}

/// Hash strategy of a table.
///
/// Implemented by [`PointerHash`], by any `Fn(&K) -> u64`, and by
/// `Option<H>` where `None` falls back to [`PointerHash`].
pub trait KeyHash<K> {
    /// Hashes `key`.
    fn hash_key(&self, key: &K) -> u64;
}

/// Equality strategy of a table.
///
/// Implemented by [`PointerEq`], by any `Fn(&K, &K) -> bool`, and by
/// `Option<E>` where `None` falls back to [`PointerEq`].
pub trait KeyEq<K> {
    /// Compares two keys.
    fn key_eq(&self, a: &K, b: &K) -> bool;

    /// Returns `true` when this strategy is plain key identity, enabling the
    /// table's identity fast path.
    fn is_identity(&self) -> bool {
        false
    }
}

/// Default hash: [`pointer_hash`] over the key's handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointerHash;

/// Default equality: key identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointerEq;

impl<K: TableKey> KeyHash<K> for PointerHash {
    fn hash_key(&self, key: &K) -> u64 {
        pointer_hash(key.handle())
    }
}

impl<K: TableKey> KeyEq<K> for PointerEq {
    fn key_eq(&self, a: &K, b: &K) -> bool {
        a == b
    }

    fn is_identity(&self) -> bool {
        true
    }
}

impl<K, F> KeyHash<K> for F
where
    F: Fn(&K) -> u64,
{
    fn hash_key(&self, key: &K) -> u64 {
        self(key)
    }
}

impl<K, F> KeyEq<K> for F
where
    F: Fn(&K, &K) -> bool,
{
    fn key_eq(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}

impl<K: TableKey, H: KeyHash<K>> KeyHash<K> for Option<H> {
    fn hash_key(&self, key: &K) -> u64 {
        match self {
            Some(hash) => hash.hash_key(key),
            None => PointerHash.hash_key(key),
        }
    }
}

impl<K: TableKey, E: KeyEq<K>> KeyEq<K> for Option<E> {
    fn key_eq(&self, a: &K, b: &K) -> bool {
        match self {
            Some(eq) => eq.key_eq(a, b),
            None => a == b,
        }
    }

    fn is_identity(&self) -> bool {
        self.as_ref().map_or(true, |eq| KeyEq::<K>::is_identity(eq))
    }
}

/// Mixes a 64-bit handle into a well-distributed hash.
pub fn pointer_hash(handle: u64) -> u64 {
    let p = handle as i64;
    let mut r = (!(p << 32)).wrapping_add(p);
    r ^= r >> 22;
    r = r.wrapping_add(!(r << 13));
    r = (r ^ (r >> 8)).wrapping_mul(9);
    r ^= r >> 15;
    r = r.wrapping_add(!(r << 27));
    (r ^ (r >> 31)) as u64
}

/// Multiplicative (`h * 33 + byte`) string hash.
pub fn string_hash(s: &str) -> u64 {
    s.bytes().fold(0i64, |h, b| {
        h.wrapping_mul(33).wrapping_add(i64::from(b as i8))
    }) as u64
}
