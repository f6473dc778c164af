use crate::descriptor::Status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A type name outside the closed vocabulary.
    UnknownType { name: String },
    /// A dynamic value of the wrong kind for its declared argument type.
    /// `position` is 1-based.
    BadArgument {
        position: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// The engine met ABI metadata it did not create.
    Internal { message: &'static str },
    /// The descriptor's call interface was rejected during preparation.
    NotPrepared { status: Status },
    /// The descriptor's type arrays have already been freed.
    Released,
    /// Symbol resolution failed (host side only).
    Symbol { name: String, reason: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownType { name } => {
                write!(f, "unknown type '{name}'")
            }
            Error::BadArgument {
                position,
                expected,
                got,
            } => write!(
                f,
                "bad argument #{position} ({expected} expected, got {got})"
            ),
            Error::Internal { message } => {
                write!(f, "internal error: {message}")
            }
            Error::NotPrepared { status } => {
                write!(f, "call interface not prepared: {status}")
            }
            Error::Released => write!(f, "call descriptor already released"),
            Error::Symbol { name, reason } => {
                write!(f, "cannot resolve '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
