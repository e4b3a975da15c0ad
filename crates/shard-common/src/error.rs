use thiserror::Error;

pub type ShardResult<T> = Result<T, ShardError>;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Decode error ({0})")]
    DecodeError(Box<str>),
    #[error("Checksum mismatch. The shard index is corrupted.")]
    ChecksumMismatch,
    #[error("Invalid argument ({0})")]
    ArgErr(Box<str>),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error ({0})")]
    Store(Box<str>),
}

impl ShardError {
    /// Whether the error means the stored bytes cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ShardError::DecodeError(_) | ShardError::ChecksumMismatch)
    }
}

/// Builds a [`ShardError::DecodeError`] from a format string.
#[macro_export]
macro_rules! decode_err {
    ($($arg:tt)*) => {
        $crate::ShardError::DecodeError(::std::format!($($arg)*).into_boxed_str())
    };
}

/// Builds a [`ShardError::ArgErr`] from a format string.
#[macro_export]
macro_rules! arg_err {
    ($($arg:tt)*) => {
        $crate::ShardError::ArgErr(::std::format!($($arg)*).into_boxed_str())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(ShardError::ChecksumMismatch.is_corruption());
        assert!(decode_err!("bad mode {}", 7).is_corruption());
        assert!(!arg_err!("level {} out of range", 3).is_corruption());
        let io = ShardError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_corruption());
        assert_eq!(decode_err!("short").to_string(), "Decode error (short)");
    }
}
