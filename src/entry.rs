//! Encoding and parsing of the entry list that opens a compressed chain.
//!
//! Format:
//!  1. One entry per certificate, in chain order. Each entry is a type byte (1 for compressed,
//!     2 for cached), followed by the 8-byte little-endian certificate hash if cached.
//!  2. A single zero byte marking the end of the list.
//!
//! Anything after the end marker belongs to the compressed block.

use crate::{
    error::{Error, Result},
    hash::{hash_certs, HASH_SIZE},
    matcher::{CertEntry, EntryType, END_MARKER},
};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Size in bytes of the serialized form of `entries`, end marker included.
pub fn entries_size(entries: &[CertEntry]) -> usize {
    entries.iter().map(CertEntry::encoded_len).sum::<usize>() + 1
}

/// Append the serialized form of `entries` to `out`. Exactly [`entries_size`] bytes are written.
pub fn serialize_entries(out: &mut Vec<u8>, entries: &[CertEntry]) {
    let start = out.len();
    out.reserve(entries_size(entries));
    for entry in entries {
        out.push(entry.type_byte());
        if let CertEntry::Cached(hash) = *entry {
            // Writing to a Vec can't fail
            let _ = out.write_u64::<LittleEndian>(hash);
        }
    }
    out.push(END_MARKER);
    debug_assert_eq!(out.len() - start, entries_size(entries));
}

/// The result of parsing an entry list.
#[derive(Clone, Debug)]
pub struct ParsedEntries<'a> {
    /// One entry per certificate in the chain.
    pub entries: Vec<CertEntry>,
    /// One slot per entry. Cached entries are already resolved to the locally held certificate;
    /// compressed entries are empty placeholders.
    pub certs: Vec<Vec<u8>>,
    /// The bytes following the end marker.
    pub rest: &'a [u8],
}

/// Split `len` bytes off the front of `buf`, failing if there aren't enough.
pub(crate) fn split_prefix<'a>(
    buf: &mut &'a [u8],
    len: usize,
    step: &'static str,
) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::TruncatedInput {
            step,
            actual: buf.len(),
            expected: len,
        });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Parse the entry list at the start of `buf`, resolving cached entries against
/// `cached_certs`.
///
/// Fails if the list isn't terminated, holds an unknown type byte, or refers to a hash that none
/// of `cached_certs` has.
pub fn parse_entries<'a, C: AsRef<[u8]>>(
    mut buf: &'a [u8],
    cached_certs: &[C],
) -> Result<ParsedEntries<'a>> {
    let mut entries = Vec::new();
    let mut certs = Vec::new();
    // Only computed once a cached entry shows up
    let mut cached_hashes: Option<Vec<u64>> = None;

    loop {
        let type_byte = split_prefix(&mut buf, 1, "get entry type")?[0];
        if type_byte == END_MARKER {
            break;
        }

        match EntryType::try_from(type_byte).map_err(Error::InvalidEntryType)? {
            EntryType::Compressed => {
                entries.push(CertEntry::Compressed);
                certs.push(Vec::new());
            }
            EntryType::Cached => {
                let hash = LittleEndian::read_u64(split_prefix(
                    &mut buf,
                    HASH_SIZE,
                    "get cached certificate hash",
                )?);
                let hashes = cached_hashes.get_or_insert_with(|| hash_certs(cached_certs));
                let index = hashes
                    .iter()
                    .position(|&h| h == hash)
                    .ok_or(Error::UnknownCachedCertificate(hash))?;
                entries.push(CertEntry::Cached(hash));
                certs.push(cached_certs[index].as_ref().to_vec());
            }
        }
    }

    debug_assert_eq!(entries.len(), certs.len());
    Ok(ParsedEntries {
        entries,
        certs,
        rest: buf,
    })
}
