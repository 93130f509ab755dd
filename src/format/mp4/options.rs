//! Muxer header options
//!
//! Options are passed as an ordered string dictionary. A muxer removes every
//! key it understands; whatever is left afterwards was ignored, which callers
//! treat as an error rather than silently producing a different stream.

use std::fmt;

/// Ordered key/value options for a container writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxOptions {
    entries: Vec<(String, String)>,
}

impl MuxOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a never-finalized stream written to a pipe: fragment at
    /// every keyframe, write an empty `moov` up front and flush every
    /// fragment as soon as it is complete.
    pub fn streaming() -> Self {
        Self::new()
            .set("movflags", "frag_keyframe+empty_moov")
            .set_int("flush_packets", 1)
    }

    /// Set (or replace) a string option
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key.into(), value.into());
        self
    }

    /// Set (or replace) an integer option
    pub fn set_int(self, key: impl Into<String>, value: i64) -> Self {
        self.set(key, value.to_string())
    }

    fn insert(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove and return an option, marking it as consumed
    pub fn take(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl fmt::Display for MuxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}
