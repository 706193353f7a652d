use crate::{
    dictionary::dictionary_for_entries,
    entry::{entries_size, parse_entries, serialize_entries, split_prefix, ParsedEntries},
    error::{Error, Result},
    matcher::{match_certs, CertEntry},
    MAX_UNCOMPRESSED_SIZE,
};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

/// Size of the length fields: the total uncompressed length, and each certificate's length
/// inside the compressed block.
const LENGTH_SIZE: usize = 4;

/// zlib's default compression level.
pub const DEFAULT_LEVEL: u8 = 6;

const MAX_LEVEL: u8 = 9;

/// Space taken by the zlib wrapper: 2-byte header, 4-byte dictionary id, and the 4-byte Adler-32
/// trailer.
const ZLIB_WRAP_SIZE: usize = 2 + 4 + 4;

/// Upper bound on the zlib output for `len` bytes of input, at any compression level.
fn compress_bound(len: usize) -> usize {
    len + ((len + 7) >> 3) + ((len + 63) >> 6) + 5 + ZLIB_WRAP_SIZE
}

/// Settings for compressing and decompressing certificate chains.
///
/// Neither setting is part of the wire format: the level only affects the encoder, and the size
/// limit only affects the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompressOptions {
    level: u8,
    max_decompressed: usize,
}

impl std::default::Default for CompressOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            max_decompressed: MAX_UNCOMPRESSED_SIZE,
        }
    }
}

impl CompressOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the zlib compression level. Levels above 9 are treated as 9.
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    /// Set the largest uncompressed block the decoder will accept. This can only lower the
    /// limit: anything above [`MAX_UNCOMPRESSED_SIZE`] is treated as that.
    pub fn with_max_decompressed(mut self, max: usize) -> Self {
        self.max_decompressed = max;
        self
    }

    pub fn level(&self) -> u8 {
        self.level.min(MAX_LEVEL)
    }

    pub fn max_decompressed(&self) -> usize {
        self.max_decompressed.min(MAX_UNCOMPRESSED_SIZE)
    }

    /// Compress a certificate chain for a peer that has cached the certificates whose hashes are
    /// in `cached_hashes`. Returns an empty vector if compression fails.
    pub fn compress_chain<C: AsRef<[u8]>>(&self, certs: &[C], cached_hashes: &[u8]) -> Vec<u8> {
        match self.try_compress_chain(certs, cached_hashes) {
            Ok(out) => out,
            Err(e) => {
                warn!("Certificate chain compression failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Compress a certificate chain, reporting why compression failed instead of returning an
    /// empty vector.
    pub fn try_compress_chain<C: AsRef<[u8]>>(
        &self,
        certs: &[C],
        cached_hashes: &[u8],
    ) -> Result<Vec<u8>> {
        let entries = match_certs(certs, cached_hashes);
        debug_assert_eq!(entries.len(), certs.len());

        let uncompressed_size: usize = entries
            .iter()
            .zip(certs)
            .filter(|(entry, _)| entry.is_compressed())
            .map(|(_, cert)| LENGTH_SIZE + cert.as_ref().len())
            .sum();

        let entries_size = entries_size(&entries);
        if uncompressed_size == 0 {
            let mut out = Vec::with_capacity(entries_size);
            serialize_entries(&mut out, &entries);
            trace!(
                "Compressed chain of {} certificates, all cached: {} bytes",
                certs.len(),
                out.len()
            );
            return Ok(out);
        }

        let uncompressed_size_32 = u32::try_from(uncompressed_size).map_err(|_| {
            Error::CompressionStream(format!(
                "chain of {} bytes is too large to compress",
                uncompressed_size
            ))
        })?;

        // Dropping the stream releases it, on every return path
        let mut z = Compress::new(Compression::new(self.level().into()), true);
        z.set_dictionary(&dictionary_for_entries(&entries, certs))?;

        let mut out =
            Vec::with_capacity(entries_size + LENGTH_SIZE + compress_bound(uncompressed_size));
        serialize_entries(&mut out, &entries);
        // Writing to a Vec can't fail
        let _ = out.write_u32::<LittleEndian>(uncompressed_size_32);

        for (_, cert) in entries
            .iter()
            .zip(certs)
            .filter(|(entry, _)| entry.is_compressed())
        {
            let cert = cert.as_ref();
            let len = u32::try_from(cert.len()).map_err(|_| {
                Error::CompressionStream(format!("certificate of {} bytes is too large", cert.len()))
            })?;
            deflate_all(&mut z, &len.to_le_bytes(), &mut out)?;
            deflate_all(&mut z, cert, &mut out)?;
        }

        match z.compress_vec(&[], &mut out, FlushCompress::Finish)? {
            Status::StreamEnd => (),
            status => {
                return Err(Error::CompressionStream(format!(
                    "stream didn't finish, status {:?}",
                    status
                )))
            }
        }

        trace!(
            "Compressed chain of {} certificates: {} bytes of entries, {} bytes deflated to {}",
            certs.len(),
            entries_size,
            uncompressed_size,
            z.total_out()
        );
        Ok(out)
    }

    /// Decompress a certificate chain, resolving cached entries against `cached_certs`.
    ///
    /// The certificates are returned in chain order. Any malformed input fails the whole call.
    pub fn decompress_chain<C: AsRef<[u8]>>(
        &self,
        input: &[u8],
        cached_certs: &[C],
    ) -> Result<Vec<Vec<u8>>> {
        self.decompress_chain_inner(input, cached_certs)
            .inspect_err(|e| debug!("Rejected compressed certificate chain: {}", e))
    }

    fn decompress_chain_inner<C: AsRef<[u8]>>(
        &self,
        input: &[u8],
        cached_certs: &[C],
    ) -> Result<Vec<Vec<u8>>> {
        let ParsedEntries {
            entries,
            mut certs,
            rest,
        } = parse_entries(input, cached_certs)?;

        let uncompressed = if rest.is_empty() {
            Vec::new()
        } else {
            self.inflate(rest, &entries, &certs)?
        };

        let mut buf = &uncompressed[..];
        for (_, cert) in entries
            .iter()
            .zip(certs.iter_mut())
            .filter(|(entry, _)| entry.is_compressed())
        {
            let len = LittleEndian::read_u32(split_prefix(
                &mut buf,
                LENGTH_SIZE,
                "get certificate length",
            )?) as usize;
            *cert = split_prefix(&mut buf, len, "get certificate data")?.to_vec();
        }

        if !buf.is_empty() {
            return Err(Error::CorruptStream(
                "uncompressed data left over after the last certificate",
            ));
        }

        trace!(
            "Decompressed chain of {} certificates from {} bytes",
            certs.len(),
            input.len()
        );
        Ok(certs)
    }

    /// Inflate the compressed block. `certs` must hold the resolved cached certificates, which
    /// are needed for the preset dictionary.
    fn inflate(
        &self,
        mut input: &[u8],
        entries: &[CertEntry],
        certs: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let size = LittleEndian::read_u32(split_prefix(
            &mut input,
            LENGTH_SIZE,
            "get uncompressed length",
        )?) as usize;
        let max = self.max_decompressed();
        if size > max {
            return Err(Error::DecompressedTooLarge { max, actual: size });
        }

        let mut out = vec![0u8; size];
        let mut z = Decompress::new(true);

        let status = match z.decompress(input, &mut out, FlushDecompress::Finish) {
            Ok(status) => status,
            Err(e) if e.needs_dictionary().is_some() => {
                z.set_dictionary(&dictionary_for_entries(entries, certs))?;
                let consumed = z.total_in() as usize;
                let produced = z.total_out() as usize;
                z.decompress(
                    &input[consumed..],
                    &mut out[produced..],
                    FlushDecompress::Finish,
                )?
            }
            Err(e) => return Err(e.into()),
        };

        let consumed = z.total_in() as usize;
        let produced = z.total_out() as usize;
        if status != Status::StreamEnd {
            // Either the input ran out, or the declared size was too small
            if consumed == input.len() {
                return Err(Error::TruncatedInput {
                    step: "inflate certificate data",
                    actual: input.len(),
                    expected: input.len() + 1,
                });
            }
            if produced == size {
                return Err(Error::CorruptStream(
                    "decompressed data is longer than the declared length",
                ));
            }
            return Err(Error::CompressionStream(format!(
                "stream stopped early, status {:?}",
                status
            )));
        }
        if consumed != input.len() {
            return Err(Error::CorruptStream(
                "compressed data left over after the end of the stream",
            ));
        }
        if produced != size {
            return Err(Error::CorruptStream(
                "decompressed data is shorter than the declared length",
            ));
        }
        Ok(out)
    }
}

/// Feed all of `input` to the stream without flushing.
fn deflate_all(z: &mut Compress, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if input.is_empty() {
        return Ok(());
    }
    let before = z.total_in();
    let status = z.compress_vec(input, out, FlushCompress::None)?;
    let consumed = (z.total_in() - before) as usize;
    if status != Status::Ok || consumed != input.len() {
        return Err(Error::CompressionStream(format!(
            "deflate consumed {} of {} bytes, status {:?}",
            consumed,
            input.len(),
            status
        )));
    }
    Ok(())
}

/// Compress a certificate chain with the default options. See
/// [`CompressOptions::compress_chain`].
pub fn compress_chain<C: AsRef<[u8]>>(certs: &[C], cached_hashes: &[u8]) -> Vec<u8> {
    CompressOptions::default().compress_chain(certs, cached_hashes)
}

/// Compress a certificate chain with the default options. See
/// [`CompressOptions::try_compress_chain`].
pub fn try_compress_chain<C: AsRef<[u8]>>(certs: &[C], cached_hashes: &[u8]) -> Result<Vec<u8>> {
    CompressOptions::default().try_compress_chain(certs, cached_hashes)
}

/// Decompress a certificate chain with the default options. See
/// [`CompressOptions::decompress_chain`].
pub fn decompress_chain<C: AsRef<[u8]>>(input: &[u8], cached_certs: &[C]) -> Result<Vec<Vec<u8>>> {
    CompressOptions::default().decompress_chain(input, cached_certs)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::{cached_hashes_blob, fnv1a_64};
    use rand::Rng;

    // Roughly certificate-shaped: a shared prefix, then random bytes
    fn make_cert(rng: &mut impl Rng, len: usize) -> Vec<u8> {
        let mut cert = b"\x30\x82\x05\x8b\x30\x82\x04\x73\xa0\x03\x02\x01\x02".to_vec();
        cert.extend((0..len).map(|_| rng.gen::<u8>() % 16));
        cert
    }

    fn make_chain(n: usize) -> Vec<Vec<u8>> {
        let mut rng = rand::thread_rng();
        (0..n).map(|i| make_cert(&mut rng, 200 + 100 * i)).collect()
    }

    #[test]
    fn roundtrip_no_cache() {
        let certs = make_chain(3);
        let out = compress_chain(&certs, &[]);
        assert!(!out.is_empty());
        assert_eq!(&out[..4], &[1, 1, 1, 0]);
        let decoded = decompress_chain::<Vec<u8>>(&out, &[]).unwrap();
        assert_eq!(decoded, certs);
    }

    #[test]
    fn roundtrip_every_cache_subset() {
        let certs = make_chain(4);
        for mask in 0..(1u32 << certs.len()) {
            let cache: Vec<Vec<u8>> = certs
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, c)| c.clone())
                .collect();
            let out = compress_chain(&certs, &cached_hashes_blob(&cache));
            let decoded = decompress_chain(&out, &cache).unwrap();
            assert_eq!(decoded, certs, "failed with cache mask {:#b}", mask);
        }
    }

    #[test]
    fn cache_helps() {
        let certs = make_chain(3);
        let blob = cached_hashes_blob(&certs[1..]);
        let full = compress_chain(&certs, &[]);
        let partial = compress_chain(&certs, &blob);
        assert!(partial.len() < full.len());
    }

    #[test]
    fn all_cached() {
        let certs = make_chain(3);
        let out = compress_chain(&certs, &cached_hashes_blob(&certs));
        let entries = match_certs(&certs, &cached_hashes_blob(&certs));
        assert_eq!(out.len(), entries_size(&entries));
        assert_eq!(out.len(), 3 * 9 + 1);
        assert_eq!(out[0], 2);
        assert_eq!(&out[1..9], &fnv1a_64(&certs[0]).to_le_bytes());
        assert_eq!(*out.last().unwrap(), 0);
        assert_eq!(decompress_chain(&out, &certs).unwrap(), certs);
    }

    #[test]
    fn empty_chain() {
        let out = compress_chain::<Vec<u8>>(&[], &[]);
        assert_eq!(out, vec![0]);
        assert!(decompress_chain::<Vec<u8>>(&out, &[]).unwrap().is_empty());
    }

    #[test]
    fn empty_certificate() {
        let certs = vec![Vec::new(), b"not empty".to_vec(), Vec::new()];
        let out = compress_chain(&certs, &[]);
        assert_eq!(decompress_chain::<Vec<u8>>(&out, &[]).unwrap(), certs);
    }

    #[test]
    fn malformed_cache_blob() {
        let certs = make_chain(2);
        let mut blob = cached_hashes_blob(&certs);
        blob.push(0);
        let out = compress_chain(&certs, &blob);
        assert_eq!(out, compress_chain(&certs, &[]));
        assert_eq!(decompress_chain::<Vec<u8>>(&out, &[]).unwrap(), certs);
    }

    #[test]
    fn deterministic() {
        let certs = make_chain(3);
        let blob = cached_hashes_blob(&certs[2..]);
        assert_eq!(compress_chain(&certs, &blob), compress_chain(&certs, &blob));
        let opts = CompressOptions::new().with_level(9);
        assert_eq!(
            opts.compress_chain(&certs, &blob),
            opts.compress_chain(&certs, &blob)
        );
    }

    #[test]
    fn levels() {
        let certs = make_chain(2);
        for level in [0, 1, 6, 9, 200] {
            let out = CompressOptions::new()
                .with_level(level)
                .try_compress_chain(&certs, &[])
                .unwrap();
            assert_eq!(decompress_chain::<Vec<u8>>(&out, &[]).unwrap(), certs);
        }
    }

    #[test]
    fn declared_size_too_large() {
        let certs = make_chain(2);
        let mut out = compress_chain(&certs, &[]);
        // Entries are 3 bytes, then the length field
        out[3..7].copy_from_slice(&(128 * 1024 + 1u32).to_le_bytes());
        let err = decompress_chain::<Vec<u8>>(&out, &[]).unwrap_err();
        assert_eq!(
            err,
            Error::DecompressedTooLarge {
                max: MAX_UNCOMPRESSED_SIZE,
                actual: 128 * 1024 + 1
            }
        );
        out[3..7].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = decompress_chain::<Vec<u8>>(&out, &[]).unwrap_err();
        assert!(matches!(err, Error::DecompressedTooLarge { .. }));
    }

    #[test]
    fn lowered_limit() {
        let certs = make_chain(2);
        let out = compress_chain(&certs, &[]);
        let opts = CompressOptions::new().with_max_decompressed(64);
        let err = opts.decompress_chain::<Vec<u8>>(&out, &[]).unwrap_err();
        assert!(matches!(err, Error::DecompressedTooLarge { max: 64, .. }));
        let opts = CompressOptions::new().with_max_decompressed(usize::MAX);
        assert_eq!(opts.max_decompressed(), MAX_UNCOMPRESSED_SIZE);
    }

    #[test]
    fn declared_size_mismatch() {
        let certs = make_chain(2);
        let out = compress_chain(&certs, &[]);
        let declared = LittleEndian::read_u32(&out[3..7]);

        let mut longer = out.clone();
        longer[3..7].copy_from_slice(&(declared + 1).to_le_bytes());
        let err = decompress_chain::<Vec<u8>>(&longer, &[]).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)), "got {:?}", err);

        let mut shorter = out.clone();
        shorter[3..7].copy_from_slice(&(declared - 1).to_le_bytes());
        let err = decompress_chain::<Vec<u8>>(&shorter, &[]).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)), "got {:?}", err);
    }

    #[test]
    fn every_truncation_rejected() {
        let certs = make_chain(3);
        let blob = cached_hashes_blob(&certs[1..2]);
        let cache = vec![certs[1].clone()];
        let out = compress_chain(&certs, &blob);
        for len in 0..out.len() {
            let err = decompress_chain(&out[..len], &cache).unwrap_err();
            assert!(
                matches!(err, Error::TruncatedInput { .. } | Error::CorruptStream(_)),
                "truncated to {} bytes, got {:?}",
                len,
                err
            );
        }
    }

    #[test]
    fn trailing_garbage() {
        let certs = make_chain(2);
        let mut out = compress_chain(&certs, &[]);
        out.push(0);
        let err = decompress_chain::<Vec<u8>>(&out, &[]).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)), "got {:?}", err);
    }

    #[test]
    fn block_without_compressed_entries() {
        let certs = make_chain(1);
        let out = compress_chain(&certs, &[]);
        let mut tampered = out.clone();
        // Swap the single compressed entry for the end marker: the block is now unclaimed
        tampered[0] = 0;
        tampered.remove(1);
        let err = decompress_chain::<Vec<u8>>(&tampered, &[]).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)), "got {:?}", err);
    }

    #[test]
    fn unknown_cached_certificate() {
        let certs = make_chain(2);
        let out = compress_chain(&certs, &cached_hashes_blob(&certs[..1]));
        let err = decompress_chain::<Vec<u8>>(&out, &[]).unwrap_err();
        assert_eq!(err, Error::UnknownCachedCertificate(fnv1a_64(&certs[0])));
        let err = decompress_chain(&out, &certs[1..]).unwrap_err();
        assert_eq!(err, Error::UnknownCachedCertificate(fnv1a_64(&certs[0])));
    }

    #[test]
    fn wrong_dictionary() {
        // Same hash on the wire, but the decoder's dictionary can't match
        let certs = make_chain(2);
        let out = compress_chain(&certs, &cached_hashes_blob(&certs[..1]));
        let mut tampered = out.clone();
        let other = b"some other certificate".to_vec();
        tampered[1..9].copy_from_slice(&fnv1a_64(&other).to_le_bytes());
        let err = decompress_chain(&tampered, &[other]).unwrap_err();
        assert!(matches!(err, Error::CompressionStream(_)), "got {:?}", err);
    }

    #[test]
    fn garbage_block() {
        let mut input = vec![1, 0];
        input.extend_from_slice(&16u32.to_le_bytes());
        input.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x11]);
        let err = decompress_chain::<Vec<u8>>(&input, &[]).unwrap_err();
        assert!(matches!(err, Error::CompressionStream(_)), "got {:?}", err);
    }

    #[test]
    fn random_input_never_panics() {
        let mut rng = rand::thread_rng();
        let cache = make_chain(2);
        for _ in 0..2000 {
            let len = rng.gen_range(0..64);
            let mut input: Vec<u8> = (0..len).map(|_| rng.gen_range(0..4)).collect();
            input.extend((0..rng.gen_range(0..32)).map(|_| rng.gen::<u8>()));
            let _ = decompress_chain(&input, &cache);
        }
    }

    #[test]
    fn options_serde() {
        let opts: CompressOptions = serde_json::from_str(r#"{"level": 9}"#).unwrap();
        assert_eq!(opts.level(), 9);
        assert_eq!(opts.max_decompressed(), MAX_UNCOMPRESSED_SIZE);
        let json = serde_json::to_string(&CompressOptions::default()).unwrap();
        assert_eq!(json, r#"{"level":6,"max_decompressed":131072}"#);
        assert!(serde_json::from_str::<CompressOptions>(r#"{"lvl": 1}"#).is_err());
    }
}
