//! Definition of errors.

use std::error::Error;
use std::fmt;

/// A specialized Result type for swalign.
pub type Result<T, E = SwAlignError> = std::result::Result<T, E>;

/// The error type for swalign.
#[derive(Debug)]
pub enum SwAlignError {
    /// A parameter file, corpus file, or vocabulary file did not match its
    /// expected record layout.
    InvalidFormat(InvalidFormatError),

    /// An argument combination was inconsistent (unknown model name,
    /// mismatched dimensions, ...).
    InvalidArgument(InvalidArgumentError),

    /// A posterior or log-probability evaluated to `NaN`. The offending
    /// sentence pair is skipped by the trainer; this variant is only
    /// surfaced when the caller asks for a single-pair computation.
    Numeric(String),

    /// Allocation of an E-step matrix failed, or the matrix would exceed
    /// the configured size cap.
    Resource(String),

    /// Training was cancelled cooperatively at a chunk boundary.
    Cancelled,

    /// The error variant for [`TryFromIntError`](std::num::TryFromIntError).
    TryFromInt(std::num::TryFromIntError),

    /// The error variant for [`ParseIntError`](std::num::ParseIntError).
    ParseInt(std::num::ParseIntError),

    /// The error variant for [`ParseFloatError`](std::num::ParseFloatError).
    ParseFloat(std::num::ParseFloatError),

    /// The error variant for [`DecodeError`](bincode::error::DecodeError).
    BincodeDecode(bincode::error::DecodeError),

    /// The error variant for [`EncodeError`](bincode::error::EncodeError).
    BincodeEncode(bincode::error::EncodeError),

    /// The error variant for [`std::io::Error`].
    StdIo(std::io::Error),
}

impl SwAlignError {
    pub(crate) fn invalid_format<S>(file: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            file,
            msg: msg.into(),
        })
    }

    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }
}

impl fmt::Display for SwAlignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidFormat(e) => e.fmt(f),
            Self::InvalidArgument(e) => e.fmt(f),
            Self::Numeric(msg) => write!(f, "NumericError: {msg}"),
            Self::Resource(msg) => write!(f, "ResourceError: {msg}"),
            Self::Cancelled => write!(f, "training was cancelled"),
            Self::TryFromInt(e) => e.fmt(f),
            Self::ParseInt(e) => e.fmt(f),
            Self::ParseFloat(e) => e.fmt(f),
            Self::BincodeDecode(e) => e.fmt(f),
            Self::BincodeEncode(e) => e.fmt(f),
            Self::StdIo(e) => e.fmt(f),
        }
    }
}

impl Error for SwAlignError {}

/// Error used when a file does not match its expected record layout.
#[derive(Debug)]
pub struct InvalidFormatError {
    /// Label of the file being parsed (e.g. `"alignd"`, `"corpus"`).
    pub(crate) file: &'static str,
    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.file, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// Error used when the argument is invalid.
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// Name of the argument.
    pub(crate) arg: &'static str,
    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

impl From<std::num::TryFromIntError> for SwAlignError {
    fn from(error: std::num::TryFromIntError) -> Self {
        Self::TryFromInt(error)
    }
}

impl From<std::num::ParseIntError> for SwAlignError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::ParseInt(error)
    }
}

impl From<std::num::ParseFloatError> for SwAlignError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::ParseFloat(error)
    }
}

impl From<bincode::error::DecodeError> for SwAlignError {
    fn from(error: bincode::error::DecodeError) -> Self {
        Self::BincodeDecode(error)
    }
}

impl From<bincode::error::EncodeError> for SwAlignError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::BincodeEncode(error)
    }
}

impl From<std::io::Error> for SwAlignError {
    fn from(error: std::io::Error) -> Self {
        Self::StdIo(error)
    }
}
