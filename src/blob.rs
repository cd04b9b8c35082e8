//! # Object URL Registry
//!
//! Equivalente in-process degli object URL del browser: ogni record registra i byte
//! del file originale e riceve un URL `blob:` da usare come riferimento finché il
//! record vive.
//!
//! ## Regole:
//! - Ogni URL creato va revocato esattamente una volta
//! - `revoke` su un URL già revocato (o sconosciuto) ritorna `false`
//! - I contatori `live()` e `revoked()` rendono i leak verificabili nei test

use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

/// Registry of `blob:` URLs pointing at in-memory bytes
#[derive(Debug, Default)]
pub struct BlobRegistry {
    entries: HashMap<String, Bytes>,
    revoked: usize,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return a fresh URL for them
    pub fn create(&mut self, bytes: Bytes) -> String {
        let url = format!("blob:local/{}", Uuid::new_v4());
        self.entries.insert(url.clone(), bytes);
        url
    }

    pub fn get(&self, url: &str) -> Option<&Bytes> {
        self.entries.get(url)
    }

    /// Release a URL. Returns `false` if it was not live.
    pub fn revoke(&mut self, url: &str) -> bool {
        if self.entries.remove(url).is_some() {
            self.revoked += 1;
            true
        } else {
            false
        }
    }

    pub fn live(&self) -> usize {
        self.entries.len()
    }

    pub fn revoked(&self) -> usize {
        self.revoked
    }
}
