//! Deciding how each certificate of a chain goes on the wire.

use crate::hash::{fnv1a_64, HASH_SIZE};
use byteorder::{ByteOrder, LittleEndian};

/// Entry type byte that terminates the entry list. Never a valid entry.
pub const END_MARKER: u8 = 0;

/// How a single certificate is represented in a compressed chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CertEntry {
    /// The certificate's bytes are carried in the trailing zlib block.
    Compressed,
    /// The peer already holds the certificate, so only its 64-bit FNV-1a hash is sent.
    Cached(u64),
}

impl CertEntry {
    pub fn is_compressed(&self) -> bool {
        matches!(self, CertEntry::Compressed)
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, CertEntry::Cached(_))
    }

    /// The type byte that opens this entry on the wire.
    pub fn type_byte(&self) -> u8 {
        EntryType::from(self).into()
    }

    /// Length of this entry once encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            CertEntry::Compressed => 1,
            CertEntry::Cached(_) => 1 + HASH_SIZE,
        }
    }
}

/// The wire type of an entry, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryType {
    Compressed,
    Cached,
}

impl From<&CertEntry> for EntryType {
    fn from(entry: &CertEntry) -> Self {
        match entry {
            CertEntry::Compressed => EntryType::Compressed,
            CertEntry::Cached(_) => EntryType::Cached,
        }
    }
}

impl From<EntryType> for u8 {
    fn from(val: EntryType) -> u8 {
        match val {
            EntryType::Compressed => 1,
            EntryType::Cached => 2,
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = u8;
    fn try_from(val: u8) -> Result<EntryType, u8> {
        match val {
            1 => Ok(EntryType::Compressed),
            2 => Ok(EntryType::Cached),
            _ => Err(val),
        }
    }
}

/// Work out how to represent `certs` to a peer that has cached the certificates whose hashes
/// are in `cached_hashes`.
///
/// `cached_hashes` is a concatenation of 8-byte little-endian FNV-1a hashes. If it's empty, or
/// its length isn't a multiple of 8, it's ignored and every certificate is compressed. The
/// returned list always has one entry per certificate, in the same order.
pub fn match_certs<C: AsRef<[u8]>>(certs: &[C], cached_hashes: &[u8]) -> Vec<CertEntry> {
    let cached_valid = !cached_hashes.is_empty() && cached_hashes.len() % HASH_SIZE == 0;

    certs
        .iter()
        .map(|cert| {
            if !cached_valid {
                return CertEntry::Compressed;
            }
            let hash = fnv1a_64(cert.as_ref());
            let cached = cached_hashes
                .chunks_exact(HASH_SIZE)
                .any(|raw| LittleEndian::read_u64(raw) == hash);
            if cached {
                CertEntry::Cached(hash)
            } else {
                CertEntry::Compressed
            }
        })
        .collect()
}
