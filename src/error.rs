use thiserror::Error;

use crate::emulation::{EmulationError, Fault, LimitExceeded, MemoryFault};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Creation-time errors are raised while a library is parsed,
/// mapped and linked; they abort [`Session::open`](crate::emulation::Session::open) and are
/// never retried. Execution-time errors are raised while emulated code runs; they abort the
/// current invocation and poison the session, but never the host process.
///
/// # Error Categories
///
/// ## Image Errors (creation time)
/// - [`Error::Malformed`] - Corrupted, truncated or unsupported ELF structure
/// - [`Error::GoblinErr`] - ELF parsing errors from the goblin crate
/// - [`Error::UnsupportedArchitecture`] - The image targets another machine
/// - [`Error::UnresolvedSymbol`] - An import has neither a provider image nor a host stub
///
/// ## Execution Errors (invocation time)
/// - [`Error::Fault`] - Emulated code trapped on an illegal access or instruction
/// - [`Error::Timeout`] - The instruction or wall-clock budget ran out
/// - [`Error::SymbolNotFound`] - The requested export does not exist
/// - [`Error::SessionPoisoned`] / [`Error::SessionClosed`] / [`Error::NotInitialized`] -
///   The session is not in a state that accepts invocations
///
/// ## Host Errors
/// - [`Error::Emulation`] - Host-side invariant violation (bad handle, bad descriptor, ...)
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::LockError`] - Poisoned synchronisation primitive
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::{Error, emulation::{EmulationConfig, Session}};
///
/// let bytes = std::fs::read("libauth.so")?;
/// match Session::open(&bytes, EmulationConfig::token()) {
///     Ok(session) => println!("loaded {} images", session.images().len()),
///     Err(Error::UnresolvedSymbol { symbol, image }) => {
///         eprintln!("{image} needs a stub for {symbol}");
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Image Errors
    /// The image is damaged and could not be parsed.
    ///
    /// This error indicates that the ELF structure is truncated, internally
    /// inconsistent, or uses a feature (for example an unknown relocation type)
    /// that the loader does not support. The error includes the source
    /// location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    // Assembler Errors
    /// A branch refers to a label that was never defined.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// The image targets a machine other than AArch64.
    ///
    /// The associated value is the raw `e_machine` field of the ELF header.
    #[error("Unsupported architecture - e_machine {machine}")]
    UnsupportedArchitecture {
        /// The `e_machine` value found in the header
        machine: u16,
    },

    /// An imported symbol could not be resolved.
    ///
    /// Neither an already-loaded image exports the symbol nor does the stub
    /// table provide a host implementation. Adding the missing stub is a code
    /// change; retrying cannot succeed.
    #[error("Unresolved symbol '{symbol}' imported by {image}")]
    UnresolvedSymbol {
        /// Name of the missing symbol
        symbol: String,
        /// Name of the image importing it
        image: String,
    },

    // Execution Errors
    /// Emulated code faulted.
    ///
    /// The session that produced this error has been poisoned and must be
    /// discarded.
    #[error("Runtime fault - {0}")]
    Fault(Fault),

    /// The invocation exceeded its instruction or wall-clock budget, or was cancelled.
    ///
    /// The session that produced this error has been poisoned and must be
    /// discarded.
    #[error("Timeout - {0}")]
    Timeout(LimitExceeded),

    /// The requested export or native method does not exist.
    #[error("Symbol not found - {0}")]
    SymbolNotFound(String),

    /// The session faulted or timed out earlier and refuses further invocations.
    #[error("Session is poisoned by an earlier fault")]
    SessionPoisoned,

    /// The session has been closed.
    #[error("Session is closed")]
    SessionClosed,

    /// An invocation was attempted before [`Session::initialize`](crate::emulation::Session::initialize).
    #[error("Session is not initialized")]
    NotInitialized,

    // Host Errors
    /// Host-side emulation error.
    ///
    /// Raised for violated invariants inside the emulator's own bookkeeping, such
    /// as overlapping mappings, stale object handles or unparsable type descriptors.
    #[error("{0}")]
    Emulation(Box<EmulationError>),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during ELF parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Failed to lock target.
    ///
    /// This error occurs when a mutex guarding a session pool was poisoned by a
    /// panicking thread.
    #[error("Failed to lock target")]
    LockError,
}

impl From<EmulationError> for Error {
    fn from(error: EmulationError) -> Self {
        Error::Emulation(Box::new(error))
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Fault(fault)
    }
}

impl From<MemoryFault> for Error {
    fn from(fault: MemoryFault) -> Self {
        Error::Fault(Fault::Memory(fault))
    }
}
