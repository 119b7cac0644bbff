use std::{
    fmt::Write as _,
    num::NonZeroU64,
    sync::{
        atomic::{AtomicU64, Ordering},
        OnceLock,
    },
};

use crate::KeyValue;

/// A stable identity for an [`Encoder`].
///
/// [`AttributeSet`][crate::AttributeSet] caches encoded output by encoder identity, so two encoders
/// that may produce different output must never share an `EncoderId`.  Use
/// [`EncoderId::unique`] to allocate a fresh one for each encoder instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EncoderId(NonZeroU64);

impl EncoderId {
    /// Allocates a process-unique identity.
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);

        let offset = NEXT.fetch_add(1, Ordering::Relaxed);
        EncoderId(NonZeroU64::MIN.saturating_add(offset))
    }

    /// Gets the raw value of this identity.
    ///
    /// The raw value is never zero.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Renders an attribute set into a string.
///
/// Implementations must be deterministic: the same attributes must always produce the same output
/// for a given [`id`][Encoder::id], as the output is cached on the attribute set.
pub trait Encoder: Send + Sync {
    /// Gets the identity of this encoder.
    fn id(&self) -> EncoderId;

    /// Encodes the given attributes, which are sorted by key and free of duplicates.
    fn encode(&self, attributes: &[KeyValue]) -> String;
}

/// The default encoder.
///
/// Produces `key1=value1,key2=value2`, escaping `,`, `=` and `\` in keys and values with a
/// leading backslash.
#[derive(Debug)]
pub struct DefaultEncoder {
    id: EncoderId,
}

impl DefaultEncoder {
    /// Creates a new `DefaultEncoder` with its own identity.
    pub fn new() -> Self {
        DefaultEncoder { id: EncoderId::unique() }
    }
}

impl Default for DefaultEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for DefaultEncoder {
    fn id(&self) -> EncoderId {
        self.id
    }

    fn encode(&self, attributes: &[KeyValue]) -> String {
        let mut out = String::new();
        for (idx, kv) in attributes.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            escape_into(&mut out, kv.key.as_str());
            out.push('=');
            match &kv.value {
                crate::Value::String(s) => escape_into(&mut out, s),
                other => {
                    let _ = write!(out, "{}", other);
                }
            }
        }
        out
    }
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        if matches!(ch, ',' | '=' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Gets the shared [`DefaultEncoder`] instance.
pub fn default_encoder() -> &'static DefaultEncoder {
    static ENCODER: OnceLock<DefaultEncoder> = OnceLock::new();
    ENCODER.get_or_init(DefaultEncoder::new)
}
