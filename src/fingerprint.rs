use std::fmt;

use sha2::{Digest, Sha256};

use crate::RequestDescriptor;

/// Fixed-length cache key derived from a [`RequestDescriptor`].
///
/// Hashes the method, URL, body and headers. Headers are fed in the
/// descriptor's (sorted) map order, so insertion order never changes the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

// Separates hashed fields so "ab"+"c" and "a"+"bc" differ.
const FIELD_SEPARATOR: [u8; 1] = [0x1f];

impl Fingerprint {
    pub fn of(descriptor: &RequestDescriptor) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(descriptor.method().as_str().as_bytes());
        hasher.update(FIELD_SEPARATOR);
        hasher.update(descriptor.url().as_bytes());
        hasher.update(FIELD_SEPARATOR);

        match descriptor.body() {
            Some(body) => {
                hasher.update((body.len() as u64).to_be_bytes());
                hasher.update(body);
            }
            None => hasher.update(b"-"),
        }

        for (name, value) in descriptor.headers() {
            hasher.update(FIELD_SEPARATOR);
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    /// Lowercase hex digest, used as the cache file name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
