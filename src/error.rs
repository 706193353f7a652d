use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Compressed chain ended too early: mid-entry, mid-hash, mid-length field, or inside a
    /// length-prefixed certificate body.
    TruncatedInput {
        step: &'static str,
        actual: usize,
        expected: usize,
    },
    /// An entry type byte other than the end marker (0), compressed (1), or cached (2).
    InvalidEntryType(u8),
    /// A cached entry's hash doesn't match any of the locally held certificates.
    UnknownCachedCertificate(u64),
    /// The declared uncompressed length is over the allowed maximum.
    DecompressedTooLarge { max: usize, actual: usize },
    /// The zlib stream reported an error, or a status other than "needs dictionary" before the
    /// end of the stream. Also used when compression itself fails.
    CompressionStream(String),
    /// Decompression finished, but the byte accounting didn't balance.
    CorruptStream(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::TruncatedInput {
                step,
                actual,
                expected,
            } => write!(
                f,
                "Expected data length {}, but got {} on step [{}]",
                expected, actual, step
            ),
            Error::InvalidEntryType(ty) => write!(f, "Invalid certificate entry type {}", ty),
            Error::UnknownCachedCertificate(hash) => write!(
                f,
                "Cached certificate with hash {:016x} isn't held locally",
                hash
            ),
            Error::DecompressedTooLarge { max, actual } => write!(
                f,
                "Decompressed chain is {} bytes, larger than max of {} kiB",
                actual,
                max >> 10
            ),
            Error::CompressionStream(ref err) => write!(f, "zlib stream failure: {}", err),
            Error::CorruptStream(msg) => write!(f, "Corrupt compressed chain: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<flate2::CompressError> for Error {
    fn from(e: flate2::CompressError) -> Self {
        Self::CompressionStream(e.to_string())
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(e: flate2::DecompressError) -> Self {
        Self::CompressionStream(e.to_string())
    }
}
