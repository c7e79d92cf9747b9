//! Emulation error and fault types.
//!
//! Two kinds of failure are kept apart here:
//!
//! - [`EmulationError`] - the host's own bookkeeping went wrong (an overlapping mapping,
//!   a stale object handle, a descriptor that does not parse). These convert into
//!   [`crate::Error::Emulation`].
//! - [`Fault`] - the *emulated* program did something illegal (touched unmapped memory,
//!   executed an undefined encoding, hit `BRK`). Faults terminate the current run with
//!   [`RunOutcome::Faulted`](super::RunOutcome::Faulted) and poison the session.

use std::fmt;

/// Kind of memory access that was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Data load.
    Read,
    /// Data store.
    Write,
    /// Instruction fetch.
    Execute,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
            AccessKind::Execute => write!(f, "execute"),
        }
    }
}

/// Reason a memory access was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// No region covers the address.
    Unmapped,
    /// A region covers the address but its protection forbids the access.
    Protection,
}

/// A rejected access to the emulated address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryFault {
    /// First address of the access that could not be satisfied.
    pub address: u64,
    /// What the access tried to do.
    pub access: AccessKind,
    /// Why it was rejected.
    pub kind: FaultKind,
}

impl MemoryFault {
    /// Creates a fault for an access to an address no region covers.
    #[must_use]
    pub fn unmapped(address: u64, access: AccessKind) -> Self {
        MemoryFault {
            address,
            access,
            kind: FaultKind::Unmapped,
        }
    }

    /// Creates a fault for an access forbidden by the page protection.
    #[must_use]
    pub fn protection(address: u64, access: AccessKind) -> Self {
        MemoryFault {
            address,
            access,
            kind: FaultKind::Protection,
        }
    }
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Unmapped => {
                write!(f, "{} of unmapped address {:#x}", self.access, self.address)
            }
            FaultKind::Protection => write!(
                f,
                "{} of {:#x} violates page protection",
                self.access, self.address
            ),
        }
    }
}

/// A fault raised by emulated code.
///
/// Once a run faults, the CPU state is no longer trustworthy and the owning session
/// refuses further invocations.
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    /// Illegal memory access.
    Memory(MemoryFault),
    /// The fetched word does not decode to a supported instruction.
    UndefinedInstruction {
        /// Address of the instruction.
        address: u64,
        /// Raw instruction word.
        word: u32,
    },
    /// A `BRK` instruction was executed.
    Breakpoint {
        /// Address of the instruction.
        address: u64,
        /// The 16-bit immediate of the `BRK`.
        imm: u16,
    },
    /// The call stack grew beyond the configured bound.
    StackOverflow {
        /// Depth reached.
        depth: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// A host stub reported an error while servicing a trap.
    HostFailure {
        /// Name of the stub.
        function: String,
        /// Error description.
        message: String,
    },
    /// The guest requested termination (`exit`, `abort`, `__stack_chk_fail`).
    Exit {
        /// Name of the function or syscall that terminated.
        function: &'static str,
        /// Exit status passed by the guest.
        status: i64,
    },
    /// An `SVC` named a trap number with no registered stub.
    UnknownTrap {
        /// Address of the `SVC`.
        address: u64,
        /// The trap number.
        number: u16,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Memory(fault) => write!(f, "{fault}"),
            Fault::UndefinedInstruction { address, word } => {
                write!(f, "undefined instruction {word:#010x} at {address:#x}")
            }
            Fault::Breakpoint { address, imm } => {
                write!(f, "breakpoint #{imm:#x} at {address:#x}")
            }
            Fault::StackOverflow { depth, limit } => {
                write!(f, "call stack overflow: depth {depth} (limit: {limit})")
            }
            Fault::HostFailure { function, message } => {
                write!(f, "host stub {function} failed: {message}")
            }
            Fault::Exit { function, status } => {
                write!(f, "guest terminated via {function} with status {status}")
            }
            Fault::UnknownTrap { address, number } => {
                write!(f, "unknown trap #{number} at {address:#x}")
            }
        }
    }
}

impl From<MemoryFault> for Fault {
    fn from(fault: MemoryFault) -> Self {
        Fault::Memory(fault)
    }
}

/// Errors in the emulator's own bookkeeping.
///
/// This enum covers failure modes that are not caused by the emulated
/// instructions themselves but by requests the host makes of the emulator.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Page access outside the page bounds.
    PageOutOfBounds {
        /// Offset within the page.
        offset: usize,
        /// Size of the access.
        size: usize,
        /// Page size.
        page_size: usize,
    },
    /// A new region would overlap an existing one.
    RegionOverlap {
        /// Base of the rejected region.
        base: u64,
        /// Size of the rejected region.
        size: u64,
    },
    /// No region starts at (or contains) the address.
    RegionNotFound {
        /// The address that was looked up.
        address: u64,
    },
    /// Region parameters are unusable (zero size, misaligned, wrapping).
    InvalidRegion {
        /// Requested base.
        base: u64,
        /// Requested size.
        size: u64,
        /// Reason for rejection.
        reason: &'static str,
    },
    /// No free address range large enough was found.
    AddressSpaceExhausted {
        /// Requested size.
        size: u64,
    },
    /// Guest heap limit exceeded.
    HeapMemoryLimitExceeded {
        /// Current heap size.
        current: usize,
        /// Maximum allowed size.
        limit: usize,
    },
    /// Invalid pointer passed to the guest heap.
    InvalidPointer {
        /// The invalid address.
        address: u64,
        /// Reason for invalidity.
        reason: &'static str,
    },
    /// An object handle does not name a live object.
    InvalidHandle {
        /// The handle value.
        handle: u64,
    },
    /// An object exists but has the wrong shape for the operation.
    ObjectTypeMismatch {
        /// The handle value.
        handle: u64,
        /// What the operation expected.
        expected: &'static str,
    },
    /// A JNI method or field ID is unknown.
    InvalidMemberId {
        /// The ID value.
        id: u64,
    },
    /// A JNI type descriptor could not be parsed.
    InvalidDescriptor {
        /// The descriptor text.
        descriptor: String,
    },
    /// Array index out of range.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The array length.
        length: usize,
    },
    /// Guest bytes were not valid in the expected encoding.
    InvalidEncoding {
        /// Address of the bytes.
        address: u64,
        /// The encoding that failed.
        encoding: &'static str,
    },
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::PageOutOfBounds {
                offset,
                size,
                page_size,
            } => write!(
                f,
                "page access out of bounds: offset {offset} + size {size} > page size {page_size}"
            ),
            EmulationError::RegionOverlap { base, size } => {
                write!(
                    f,
                    "region {base:#x}..{:#x} overlaps an existing mapping",
                    base.saturating_add(*size)
                )
            }
            EmulationError::RegionNotFound { address } => {
                write!(f, "no region mapped at {address:#x}")
            }
            EmulationError::InvalidRegion { base, size, reason } => {
                write!(f, "invalid region {base:#x} (size {size:#x}): {reason}")
            }
            EmulationError::AddressSpaceExhausted { size } => {
                write!(f, "no free address range of {size:#x} bytes")
            }
            EmulationError::HeapMemoryLimitExceeded { current, limit } => {
                write!(
                    f,
                    "guest heap limit exceeded: {current} bytes (limit: {limit})"
                )
            }
            EmulationError::InvalidPointer { address, reason } => {
                write!(f, "invalid pointer {address:#x}: {reason}")
            }
            EmulationError::InvalidHandle { handle } => {
                write!(f, "invalid object handle {handle:#x}")
            }
            EmulationError::ObjectTypeMismatch { handle, expected } => {
                write!(f, "object {handle:#x} is not a {expected}")
            }
            EmulationError::InvalidMemberId { id } => write!(f, "invalid member id {id:#x}"),
            EmulationError::InvalidDescriptor { descriptor } => {
                write!(f, "invalid type descriptor '{descriptor}'")
            }
            EmulationError::IndexOutOfBounds { index, length } => {
                write!(f, "index {index} out of bounds (length: {length})")
            }
            EmulationError::InvalidEncoding { address, encoding } => {
                write!(f, "invalid {encoding} data at {address:#x}")
            }
        }
    }
}

impl std::error::Error for EmulationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fault_display() {
        let fault = MemoryFault::unmapped(0xdead, AccessKind::Read);
        assert_eq!(fault.to_string(), "read of unmapped address 0xdead");

        let fault = MemoryFault::protection(0x1000, AccessKind::Write);
        assert_eq!(
            fault.to_string(),
            "write of 0x1000 violates page protection"
        );
    }

    #[test]
    fn test_fault_from_memory_fault() {
        let fault: Fault = MemoryFault::unmapped(0, AccessKind::Execute).into();
        assert!(matches!(
            fault,
            Fault::Memory(MemoryFault {
                kind: FaultKind::Unmapped,
                access: AccessKind::Execute,
                ..
            })
        ));
    }

    #[test]
    fn test_error_conversion() {
        let error: crate::Error = EmulationError::InvalidHandle { handle: 7 }.into();
        assert!(matches!(error, crate::Error::Emulation(_)));
        assert_eq!(error.to_string(), "invalid object handle 0x7");
    }
}
