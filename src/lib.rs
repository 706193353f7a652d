//! cert-compress shrinks the certificate chain a server sends during a handshake, taking
//! advantage of certificates the client already holds.
//!
//! A compressed chain is a list of entries, one per certificate, followed by an optional zlib
//! block:
//!
//! - Certificates the peer has cached are replaced by their 64-bit FNV-1a hash. The peer
//!   advertises what it holds as a blob of concatenated little-endian hashes (see
//!   [`cached_hashes_blob`]).
//! - All other certificates are length-prefixed, concatenated, and compressed with zlib. The
//!   preset dictionary is built from the cached certificates (in reverse chain order) followed by
//!   a fixed table of common certificate substrings, so even a cold cache compresses well.
//!
//! Wire format:
//!
//! ```text
//! entry*                      type byte: 1 = compressed, 2 = cached (+ 8-byte LE hash)
//! 0x00                        end of entries
//! [uncompressed length]       4-byte LE, only if any entry is compressed
//! [zlib block]                only if any entry is compressed
//! ```
//!
//! ```
//! use cert_compress::{cached_hashes_blob, compress_chain, decompress_chain};
//!
//! let chain = vec![b"leaf".to_vec(), b"intermediate".to_vec(), b"root".to_vec()];
//! // The client already holds the root
//! let client_cache = vec![b"root".to_vec()];
//!
//! let compressed = compress_chain(&chain, &cached_hashes_blob(&client_cache));
//! let decompressed = decompress_chain(&compressed, &client_cache).unwrap();
//! assert_eq!(decompressed, chain);
//! ```

mod compress;
pub mod dictionary;
pub mod entry;
mod error;
mod hash;
pub mod matcher;
mod substrings;

pub use compress::{
    compress_chain, decompress_chain, try_compress_chain, CompressOptions, DEFAULT_LEVEL,
};
pub use error::{Error, Result};
pub use hash::{cached_hashes_blob, fnv1a_64, HASH_SIZE};
pub use matcher::{match_certs, CertEntry};
pub use substrings::COMMON_CERT_SUBSTRINGS;

/// The maximum uncompressed size of the compressed block is 128 kiB. A peer declaring anything
/// larger is rejected before any memory is allocated for it.
pub const MAX_UNCOMPRESSED_SIZE: usize = 128 * 1024;
