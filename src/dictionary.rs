//! Preset dictionary construction for the compressed block.

use crate::{matcher::CertEntry, substrings::COMMON_CERT_SUBSTRINGS};

/// Build the zlib preset dictionary for the compressed block following `entries`.
///
/// `certs` is one-to-one with `entries`. The dictionary is the cached certificates in reverse
/// chain order, followed by [`COMMON_CERT_SUBSTRINGS`]. Both ends must build it from the same
/// entries and the same cached certificates, or decompression fails.
pub fn dictionary_for_entries<C: AsRef<[u8]>>(entries: &[CertEntry], certs: &[C]) -> Vec<u8> {
    debug_assert_eq!(entries.len(), certs.len());

    let cached = || {
        entries
            .iter()
            .zip(certs)
            .rev()
            .filter(|(entry, _)| entry.is_cached())
            .map(|(_, cert)| cert.as_ref())
    };

    let size = cached().map(<[u8]>::len).sum::<usize>() + COMMON_CERT_SUBSTRINGS.len();
    let mut dict = Vec::with_capacity(size);
    for cert in cached() {
        dict.extend_from_slice(cert);
    }
    dict.extend_from_slice(&COMMON_CERT_SUBSTRINGS);

    debug_assert_eq!(dict.len(), size);
    dict
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_substrings() {
        let certs = vec![b"a".to_vec(), b"b".to_vec()];
        let entries = vec![CertEntry::Compressed, CertEntry::Compressed];
        assert_eq!(
            dictionary_for_entries(&entries, &certs),
            COMMON_CERT_SUBSTRINGS.to_vec()
        );
        assert_eq!(
            dictionary_for_entries::<Vec<u8>>(&[], &[]),
            COMMON_CERT_SUBSTRINGS.to_vec()
        );
    }

    #[test]
    fn cached_in_reverse() {
        let certs = vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];
        let entries = vec![
            CertEntry::Cached(1),
            CertEntry::Compressed,
            CertEntry::Cached(3),
        ];
        let dict = dictionary_for_entries(&entries, &certs);
        let mut expected = b"thirdfirst".to_vec();
        expected.extend_from_slice(&COMMON_CERT_SUBSTRINGS);
        assert_eq!(dict, expected);
    }

    #[test]
    fn placeholder_slots_ignored() {
        // On the decode side, compressed slots are still empty when the dictionary is built
        let encode_side = vec![b"leaf".to_vec(), b"root".to_vec()];
        let decode_side = vec![Vec::new(), b"root".to_vec()];
        let entries = vec![CertEntry::Compressed, CertEntry::Cached(9)];
        assert_eq!(
            dictionary_for_entries(&entries, &encode_side),
            dictionary_for_entries(&entries, &decode_side)
        );
    }
}
