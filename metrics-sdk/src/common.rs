use std::hash::Hasher;

use rapidhash::fast::RapidHasher;

/// A hasher for pre-hashed keys.
///
/// Record keys compute their hash once, at construction time, and write it via `write_u64()`;
/// `finish()` then simply returns that value.  This keeps map lookups from rehashing attribute
/// sets.
///
/// Any other input is folded in with rapidhash, so the hasher stays correct, if slower, for keys
/// that are not pre-hashed.
#[derive(Debug, Default)]
pub struct KeyHasher {
    hash: u64,
}

impl Hasher for KeyHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut hasher = RapidHasher::default();
        hasher.write_u64(self.hash);
        hasher.write(bytes);
        self.hash = hasher.finish();
    }

    #[inline(always)]
    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{BuildHasher, BuildHasherDefault, Hasher};

    use super::KeyHasher;

    #[test]
    fn prehashed_values_pass_through() {
        let build = BuildHasherDefault::<KeyHasher>::default();
        let mut hasher = build.build_hasher();
        hasher.write_u64(0xdead_beef);
        assert_eq!(hasher.finish(), 0xdead_beef);

        let mut a = build.build_hasher();
        a.write(b"abc");
        let mut b = build.build_hasher();
        b.write(b"abd");
        assert_ne!(a.finish(), b.finish());
    }
}
