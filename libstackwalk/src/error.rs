use std::io;
use thiserror::Error;

/// Failures raised while building a [`crate::SymbolIndex`].
///
/// Every variant is terminal for that build attempt: the file mapping and any
/// scratch storage are released before the error is returned, and a partially
/// built index never escapes.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The executable could not be opened, read, or mapped.
    #[error("failed to open executable for indexing")]
    OpenFailure(#[source] io::Error),

    /// The executable exceeds the size bound the index can represent.
    #[error("executable is {size} bytes, beyond the representable bound")]
    TooLarge { size: u64 },

    /// The file is too small to be an ELF image or lacks the magic bytes,
    /// or its section header table is structurally out of bounds.
    #[error("not a usable ELF image: {0}")]
    MalformedImage(&'static str),

    /// No symbol table / string table pair could be located, so no index
    /// can be produced at all.
    #[error("executable has no usable symbol table")]
    IndexUnavailable,

    /// Backing storage for the index could not be reserved.
    #[error("could not reserve backing storage for the symbol index")]
    AllocationFailure,
}

/// Failures raised while printing a backtrace.
#[derive(Debug, Error)]
pub enum BacktraceError {
    /// The output sink rejected a write. The walk is abandoned immediately
    /// and never retried; the caller may be a fault handler for which a
    /// blocked or broken descriptor cannot be waited on.
    #[error("backtrace sink write failed")]
    SinkFailure(#[source] io::Error),
}
