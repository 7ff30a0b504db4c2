use crate::arguments::{canonical_arguments, Arguments};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Identity keys of every tool call handed to the caller in this session.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    keys: HashSet<[u8; 32]>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn arguments_key(name: &str, arguments: &Arguments) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"args\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical_arguments(arguments).as_bytes());
        digest(hasher)
    }

    fn index_key(name: &str, index: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"index\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(index.to_le_bytes());
        digest(hasher)
    }

    /// Registers `(name, canonical arguments)`. Returns false when it was already seen.
    pub fn claim_arguments(&mut self, name: &str, arguments: &Arguments) -> bool {
        self.keys.insert(Self::arguments_key(name, arguments))
    }

    /// Registers a call that declared its own position. Both the index key and the
    /// argument key must be new; both are recorded so the other channel can't repeat it.
    pub fn claim_indexed(&mut self, name: &str, index: u32, arguments: &Arguments) -> bool {
        let index_key = Self::index_key(name, index);
        let arguments_key = Self::arguments_key(name, arguments);
        if self.keys.contains(&index_key) || self.keys.contains(&arguments_key) {
            return false;
        }
        self.keys.insert(index_key);
        self.keys.insert(arguments_key);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

fn digest(hasher: Sha256) -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}
