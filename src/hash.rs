//! 64-bit FNV-1a fingerprints of raw certificate bytes.
//!
//! These are content fingerprints for cache lookups, not a security boundary: a collision
//! between two certificates goes undetected.

use byteorder::{LittleEndian, WriteBytesExt};
use fnv::FnvHasher;
use std::hash::Hasher;

/// Size of an encoded certificate hash.
pub const HASH_SIZE: usize = 8;

/// Compute the 64-bit FNV-1a hash of `data`.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(data);
    hasher.finish()
}

/// Hash every certificate, keeping order.
pub(crate) fn hash_certs<C: AsRef<[u8]>>(certs: &[C]) -> Vec<u64> {
    certs.iter().map(|c| fnv1a_64(c.as_ref())).collect()
}

/// Build the blob of cached certificate hashes a peer sends to advertise what it already holds:
/// each certificate's hash as 8 little-endian bytes, concatenated in order.
pub fn cached_hashes_blob<C: AsRef<[u8]>>(certs: &[C]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(certs.len() * HASH_SIZE);
    for cert in certs {
        // Writing to a Vec can't fail
        let _ = blob.write_u64::<LittleEndian>(fnv1a_64(cert.as_ref()));
    }
    blob
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn blob_layout() {
        let certs = [b"a".to_vec(), b"foobar".to_vec()];
        let blob = cached_hashes_blob(&certs);
        assert_eq!(blob.len(), 16);
        assert_eq!(&blob[..8], &0xaf63dc4c8601ec8cu64.to_le_bytes());
        assert_eq!(&blob[8..], &0x85944171f73967e8u64.to_le_bytes());
        assert_eq!(hash_certs(&certs), vec![0xaf63dc4c8601ec8c, 0x85944171f73967e8]);
    }
}
