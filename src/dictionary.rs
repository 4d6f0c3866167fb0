//! Open-vocabulary string <-> id interning, used for both attributes and
//! labels. Grounded on the quark idiom in `original_source/lib/crf/src/
//! quark.c`, generalized behind a trait so the model reader can supply a
//! read-only, mmap-backed implementation without duplicating the mutable
//! one used during training.

use std::collections::HashMap;

/// A bidirectional string interner.
///
/// Implementations are expected to hand out stable, densely packed ids
/// starting at 0. Once `seal` has been called, further `intern` calls on
/// unknown strings must fail rather than silently growing the table --
/// this is what lets `Encoder::initialize` fix the feature space before
/// training starts.
pub trait Dictionary {
    /// Look up or assign an id for `key`. Returns `None` if the dictionary
    /// is sealed and `key` has never been seen before.
    fn intern(&mut self, key: &str) -> Option<u32>;

    /// Look up the id for `key` without inserting it.
    fn lookup(&self, key: &str) -> Option<u32>;

    /// Look up the string for a previously issued id.
    fn reverse(&self, id: u32) -> Option<&str>;

    /// Number of distinct entries.
    fn size(&self) -> usize;

    /// Prevent further growth. Idempotent.
    fn seal(&mut self);

    fn is_sealed(&self) -> bool;
}

/// Default in-memory dictionary backed by a growable vector plus a
/// reverse-lookup map.
#[derive(Debug, Default, Clone)]
pub struct VecDictionary {
    strings: Vec<String>,
    ids: HashMap<String, u32>,
    sealed: bool,
}

impl VecDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sealed dictionary from an already-ordered list of strings,
    /// as when reconstructing one from a model file.
    pub fn from_strings(strings: Vec<String>) -> Self {
        let ids = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        VecDictionary {
            strings,
            ids,
            sealed: true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

impl Dictionary for VecDictionary {
    fn intern(&mut self, key: &str) -> Option<u32> {
        if let Some(&id) = self.ids.get(key) {
            return Some(id);
        }
        if self.sealed {
            return None;
        }
        let id = self.strings.len() as u32;
        self.strings.push(key.to_owned());
        self.ids.insert(key.to_owned(), id);
        Some(id)
    }

    fn lookup(&self, key: &str) -> Option<u32> {
        self.ids.get(key).copied()
    }

    fn reverse(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    fn size(&self) -> usize {
        self.strings.len()
    }

    fn seal(&mut self) {
        self.sealed = true;
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_and_reuses_ids() {
        let mut d = VecDictionary::new();
        let a = d.intern("PER").unwrap();
        let b = d.intern("LOC").unwrap();
        let a2 = d.intern("PER").unwrap();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(d.reverse(a), Some("PER"));
        assert_eq!(d.size(), 2);
    }

    #[test]
    fn sealed_dictionary_rejects_new_keys() {
        let mut d = VecDictionary::new();
        d.intern("PER").unwrap();
        d.seal();
        assert_eq!(d.intern("PER"), Some(0));
        assert_eq!(d.intern("LOC"), None);
    }

    #[test]
    fn from_strings_is_sealed_and_ordered() {
        let d = VecDictionary::from_strings(vec!["O".into(), "PER".into()]);
        assert!(d.is_sealed());
        assert_eq!(d.lookup("PER"), Some(1));
        assert_eq!(d.reverse(0), Some("O"));
    }
}
