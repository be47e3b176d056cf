//! Tagged key/value state capture contract.
//!
//! The host owns the actual serialization mechanism (file format, sections,
//! versioning); the core only populates and consumes tagged fields through
//! the [`StateWriter`] and [`StateReader`] traits. Keys are stable dotted
//! strings (`"SCH0.counter"`, `"PSG.select"`) and form part of the
//! compatibility surface - see [`crate::Psg::save_state`].
//!
//! [`MemoryStateStore`] is a plain in-memory implementation, sufficient for
//! tests and for hosts that wrap the fields into their own container.

use std::collections::BTreeMap;

/// Sink for tagged state fields produced by [`crate::Psg::save_state`].
pub trait StateWriter {
    /// Record an 8-bit field.
    fn put_u8(&mut self, key: &str, value: u8);
    /// Record a 32-bit unsigned field.
    fn put_u32(&mut self, key: &str, value: u32);
    /// Record a 32-bit signed field.
    fn put_i32(&mut self, key: &str, value: i32);
    /// Record a boolean field.
    fn put_bool(&mut self, key: &str, value: bool);
    /// Record a byte array field.
    fn put_bytes(&mut self, key: &str, value: &[u8]);
    /// Record an array of 32-bit signed values.
    fn put_i32s(&mut self, key: &str, value: &[i32]);
}

/// Source of tagged state fields consumed by [`crate::Psg::load_state`].
///
/// A `None` return means the field is absent from the captured state; the
/// core keeps the current value and repairs invariants afterwards rather
/// than failing the restore.
pub trait StateReader {
    /// Fetch an 8-bit field.
    fn get_u8(&self, key: &str) -> Option<u8>;
    /// Fetch a 32-bit unsigned field.
    fn get_u32(&self, key: &str) -> Option<u32>;
    /// Fetch a 32-bit signed field.
    fn get_i32(&self, key: &str) -> Option<i32>;
    /// Fetch a boolean field.
    fn get_bool(&self, key: &str) -> Option<bool>;
    /// Fetch a byte array field.
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;
    /// Fetch an array of 32-bit signed values.
    fn get_i32s(&self, key: &str) -> Option<Vec<i32>>;
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    U8(u8),
    U32(u32),
    I32(i32),
    Bool(bool),
    Bytes(Vec<u8>),
    I32s(Vec<i32>),
}

/// In-memory tagged field store implementing both sides of the contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStateStore {
    entries: BTreeMap<String, Entry>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captured fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fields have been captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a field with the given key was captured.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl StateWriter for MemoryStateStore {
    fn put_u8(&mut self, key: &str, value: u8) {
        self.entries.insert(key.to_string(), Entry::U8(value));
    }

    fn put_u32(&mut self, key: &str, value: u32) {
        self.entries.insert(key.to_string(), Entry::U32(value));
    }

    fn put_i32(&mut self, key: &str, value: i32) {
        self.entries.insert(key.to_string(), Entry::I32(value));
    }

    fn put_bool(&mut self, key: &str, value: bool) {
        self.entries.insert(key.to_string(), Entry::Bool(value));
    }

    fn put_bytes(&mut self, key: &str, value: &[u8]) {
        self.entries
            .insert(key.to_string(), Entry::Bytes(value.to_vec()));
    }

    fn put_i32s(&mut self, key: &str, value: &[i32]) {
        self.entries
            .insert(key.to_string(), Entry::I32s(value.to_vec()));
    }
}

impl StateReader for MemoryStateStore {
    fn get_u8(&self, key: &str) -> Option<u8> {
        match self.entries.get(key) {
            Some(Entry::U8(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        match self.entries.get(key) {
            Some(Entry::U32(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_i32(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(Entry::I32(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(Entry::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(Entry::Bytes(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn get_i32s(&self, key: &str) -> Option<Vec<i32>> {
        match self.entries.get(key) {
            Some(Entry::I32s(v)) => Some(v.clone()),
            _ => None,
        }
    }
}
