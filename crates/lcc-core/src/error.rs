use core::fmt;

/// Parsing of a frame failed: either it's malformed or the outer shell is
/// not one this codec recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lcc_core::Error: malformed frame")
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
