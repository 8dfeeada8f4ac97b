#![allow(missing_docs)]
//! A bunch of wrap errors.

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors of the standalone relay server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid listen address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

/// Why an intro was rejected. The client only ever sees `"dc"`.
#[derive(Debug, thiserror::Error)]
pub enum IntroRejection {
    #[error("pass code mismatch")]
    PassCode,

    #[error("self-signature does not verify")]
    Signature,

    #[error("id is not the hash of the public key")]
    IdMismatch,

    #[error("no parseable intro arrived in time")]
    Missing,
}
