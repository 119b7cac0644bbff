use std::{
    fmt,
    hash::{Hash, Hasher},
    slice::Iter,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use rapidhash::fast::RapidHasher;

use crate::{Encoder, SharedString};

/// Number of encoder-specific renderings an [`AttributeSet`] remembers.
const ENCODED_SLOTS: usize = 3;

/// Identity value marking an encoded-cache slot as unclaimed.
const FREE_SLOT: u64 = 0;

/// The key of an attribute.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(SharedString);

impl Key {
    /// Creates a [`Key`] from an owned or static string.
    pub fn new<K: Into<SharedString>>(key: K) -> Self {
        Key(key.into())
    }

    /// Creates a [`Key`] from a static string.
    pub const fn from_static_str(key: &'static str) -> Self {
        Key(SharedString::Borrowed(key))
    }

    /// Gets the string form of this key.
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<&'static str> for Key {
    fn from(key: &'static str) -> Self {
        Key::from_static_str(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(SharedString::Owned(key))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of an attribute.
///
/// Floating-point values compare and hash by their bit pattern, so that `Value` can be used
/// inside map keys.  This means `NaN` equals itself, and `0.0` and `-0.0` are distinct.
#[derive(Clone, Debug)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    I64(i64),
    /// A floating-point number.
    F64(f64),
    /// A string.
    String(SharedString),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => v.fmt(f),
            Value::I64(v) => v.fmt(f),
            Value::F64(v) => v.fmt(f),
            Value::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&'static str> for Value {
    fn from(v: &'static str) -> Self {
        Value::String(SharedString::Borrowed(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(SharedString::Owned(v))
    }
}

/// A single attribute: a key and its value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// The attribute key.
    pub key: Key,
    /// The attribute value.
    pub value: Value,
}

impl KeyValue {
    /// Creates a [`KeyValue`] from a key and value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        KeyValue { key: key.into(), value: value.into() }
    }
}

struct EncodedCache {
    ids: [AtomicU64; ENCODED_SLOTS],
    values: [OnceLock<Arc<str>>; ENCODED_SLOTS],
}

impl EncodedCache {
    fn new() -> Self {
        Self {
            ids: std::array::from_fn(|_| AtomicU64::new(FREE_SLOT)),
            values: std::array::from_fn(|_| OnceLock::new()),
        }
    }
}

struct Inner {
    attributes: Box<[KeyValue]>,
    hash: u64,
    encoded: EncodedCache,
}

/// An immutable, sorted and deduplicated set of attributes.
///
/// `AttributeSet` is cheap to clone: clones share the same underlying storage, including the
/// cache of encoded forms.
///
/// Attributes are ordered by key.  When the same key is given more than once, the value that was
/// given last is kept.  Equality does not depend on the order attributes were supplied in.
///
/// Each set remembers the output of up to three distinct [`Encoder`]s, so that exporters which
/// repeatedly render the same set pay for encoding only once.  Beyond that, further encoders are
/// still served, but their output is computed on every call.
#[derive(Clone)]
pub struct AttributeSet(Arc<Inner>);

impl AttributeSet {
    /// Creates an `AttributeSet` from the given attributes.
    pub fn new<I>(attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut attributes = attributes.into_iter().collect::<Vec<_>>();
        if attributes.is_empty() {
            return Self::empty();
        }

        // `sort_by` is stable: duplicates stay in input order, so the last one is kept.
        attributes.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(attributes.len());
        for kv in attributes {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        Self::from_sorted(deduped.into_boxed_slice())
    }

    /// Gets the canonical empty `AttributeSet`.
    ///
    /// Every empty set built through [`AttributeSet::new`] shares this instance.
    pub fn empty() -> Self {
        static EMPTY: OnceLock<AttributeSet> = OnceLock::new();
        EMPTY.get_or_init(|| AttributeSet::from_sorted(Box::new([]))).clone()
    }

    fn from_sorted(attributes: Box<[KeyValue]>) -> Self {
        let mut hasher = RapidHasher::default();
        attributes.hash(&mut hasher);
        let hash = hasher.finish();

        AttributeSet(Arc::new(Inner { attributes, hash, encoded: EncodedCache::new() }))
    }

    /// Gets the value for the given key, if present.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let attributes = &self.0.attributes;
        attributes
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|idx| &attributes[idx].value)
    }

    /// Gets the number of attributes in this set.
    pub fn len(&self) -> usize {
        self.0.attributes.len()
    }

    /// Whether or not this set has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.attributes.is_empty()
    }

    /// Iterates over the attributes, in key order.
    pub fn iter(&self) -> Iter<'_, KeyValue> {
        self.0.attributes.iter()
    }

    /// Gets the attributes as a slice, in key order.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0.attributes
    }

    /// Gets the precomputed hash of this set.
    ///
    /// Equal sets always have equal hashes.
    pub fn hash_value(&self) -> u64 {
        self.0.hash
    }

    /// Gets the encoded form of this set for the given encoder.
    ///
    /// The first call for a given encoder runs [`Encoder::encode`] and, if one of the cache slots is
    /// still free, remembers the result.  Later calls with an encoder of the same
    /// [`id`][Encoder::id] return the remembered string.  A given encoder identity never occupies
    /// more than one slot.
    pub fn encoded(&self, encoder: &dyn Encoder) -> Arc<str> {
        let id = encoder.id().get();
        let cache = &self.0.encoded;

        // Slots are claimed front to back and never released, so the first free slot ends the scan.
        for (slot, value) in cache.ids.iter().zip(cache.values.iter()) {
            match slot.load(Ordering::Acquire) {
                FREE_SLOT => break,
                current if current == id => {
                    return value.get_or_init(|| self.encode_with(encoder)).clone();
                }
                _ => {}
            }
        }

        let encoded = self.encode_with(encoder);
        for (slot, value) in cache.ids.iter().zip(cache.values.iter()) {
            match slot.compare_exchange(FREE_SLOT, id, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return value.get_or_init(|| encoded).clone(),
                Err(current) if current == id => return value.get_or_init(|| encoded).clone(),
                Err(_) => {}
            }
        }

        encoded
    }

    fn encode_with(&self, encoder: &dyn Encoder) -> Arc<str> {
        Arc::from(encoder.encode(&self.0.attributes))
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash && self.0.attributes == other.0.attributes)
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter().map(|kv| (kv.key.as_str(), &kv.value))).finish()
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        AttributeSet::new(iter)
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a KeyValue;
    type IntoIter = Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use proptest::prelude::*;

    use super::{AttributeSet, KeyValue, Value, ENCODED_SLOTS};
    use crate::{Encoder, EncoderId};

    struct CountingEncoder {
        id: EncoderId,
        calls: AtomicUsize,
    }

    impl CountingEncoder {
        fn new() -> Self {
            CountingEncoder { id: EncoderId::unique(), calls: AtomicUsize::new(0) }
        }
    }

    impl Encoder for CountingEncoder {
        fn id(&self) -> EncoderId {
            self.id
        }

        fn encode(&self, attributes: &[KeyValue]) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            attributes.iter().map(|kv| kv.key.as_str()).collect::<Vec<_>>().join("|")
        }
    }

    #[test]
    fn sorted_and_last_value_wins() {
        let set = AttributeSet::new([
            KeyValue::new("B", "1"),
            KeyValue::new("A", "2"),
            KeyValue::new("B", "3"),
        ]);

        let pairs = set
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), kv.value.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("A".to_string(), "2".to_string()), ("B".to_string(), "3".to_string())]);
        assert_eq!(set.value("B"), Some(&Value::from("3")));
        assert_eq!(set.value("C"), None);
    }

    #[test]
    fn empty_sets_share_one_instance() {
        let a = AttributeSet::new(Vec::new());
        let b = AttributeSet::default();
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert!(a.is_empty());
        assert_eq!(a.value("anything"), None);
    }

    #[test]
    fn values_of_different_types_are_distinct() {
        let a = AttributeSet::new([KeyValue::new("k", 1i64)]);
        let b = AttributeSet::new([KeyValue::new("k", 1.0f64)]);
        let c = AttributeSet::new([KeyValue::new("k", "1")]);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn encoded_is_memoized_per_encoder() {
        let set = AttributeSet::new([KeyValue::new("A", "B"), KeyValue::new("C", "D")]);
        let encoder = CountingEncoder::new();

        let first = set.encoded(&encoder);
        let second = set.clone().encoded(&encoder);
        assert_eq!(&*first, "A|C");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn encoders_beyond_capacity_are_served_uncached() {
        let set = AttributeSet::new([KeyValue::new("A", "B")]);
        let encoders = (0..ENCODED_SLOTS + 2).map(|_| CountingEncoder::new()).collect::<Vec<_>>();

        for _ in 0..3 {
            for encoder in &encoders {
                assert_eq!(&*set.encoded(encoder), "A");
            }
        }

        for encoder in &encoders[..ENCODED_SLOTS] {
            assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        }
        for encoder in &encoders[ENCODED_SLOTS..] {
            assert_eq!(encoder.calls.load(Ordering::SeqCst), 3);
        }
    }

    #[test]
    fn one_slot_per_encoder_under_contention() {
        let set = AttributeSet::new([KeyValue::new("A", "B")]);
        let encoder = Arc::new(CountingEncoder::new());

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let _ = set.encoded(&*encoder);
                    }
                });
            }
        });

        let id = encoder.id().get();
        let claimed = set.0.encoded.ids.iter().filter(|slot| slot.load(Ordering::SeqCst) == id);
        assert_eq!(claimed.count(), 1);
    }

    fn arb_pairs() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::vec(("[a-e]", any::<i64>()), 0..12)
    }

    proptest! {
        #[test]
        fn construction_is_order_independent(pairs in arb_pairs()) {
            // Deduplicate up front so reordering cannot change which value wins.
            let mut unique = pairs;
            unique.sort_by(|a, b| a.0.cmp(&b.0));
            unique.dedup_by(|a, b| a.0 == b.0);

            let forward = unique.iter().map(|(k, v)| KeyValue::new(k.clone(), *v)).collect::<AttributeSet>();
            let backward = unique.iter().rev().map(|(k, v)| KeyValue::new(k.clone(), *v)).collect::<AttributeSet>();
            prop_assert_eq!(&forward, &backward);
            prop_assert_eq!(forward.hash_value(), backward.hash_value());
        }

        #[test]
        fn construction_keeps_last_value(pairs in arb_pairs()) {
            let set = pairs.iter().map(|(k, v)| KeyValue::new(k.clone(), *v)).collect::<AttributeSet>();

            let keys = set.iter().map(|kv| kv.key.as_str().to_string()).collect::<Vec<_>>();
            let mut expected_keys = keys.clone();
            expected_keys.sort();
            expected_keys.dedup();
            prop_assert_eq!(&keys, &expected_keys);

            for (key, _) in &pairs {
                let last = pairs.iter().rev().find(|(k, _)| k == key).map(|(_, v)| Value::I64(*v));
                prop_assert_eq!(set.value(key), last.as_ref());
            }

            let rebuilt = set.iter().cloned().collect::<AttributeSet>();
            prop_assert_eq!(rebuilt, set);
        }
    }
}
