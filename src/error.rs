use thiserror::Error;

/// The one error type returned by every fallible entry point in this crate.
///
/// Every variant maps back to one of the error families in spec.md §7.
/// [`DriverError::code`] recovers the small negative integer a C-flavored
/// caller would have seen; Rust callers should match on the variant instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// A null-like or out-of-range argument (bad offset, bad sensor id, bad
    /// interrupt source index, ...). No state change occurs.
    #[error("invalid argument: {what}")]
    InvalidArgument { what: &'static str },

    /// A well-formed request that is illegal in the current state (start
    /// while Fault, trigger while disabled, ...). No state change occurs.
    #[error("precondition violated: {what}")]
    Precondition { what: &'static str },

    /// The OS-level shared resource (shared-memory segment, sync
    /// primitives) could not be created or attached to.
    #[error("resource unavailable: {what}")]
    ResourceUnavailable { what: &'static str },

    /// The sensor ring buffer is full; the sample was dropped and the
    /// sticky `OVERFLOW` status bit was set.
    #[error("ring buffer overflow")]
    Overflow,

    /// A blocking shared-channel call returned because shutdown was
    /// requested. Callers must treat this as terminal.
    #[error("shutdown requested")]
    Shutdown,
}

impl DriverError {
    /// The legacy small-integer code this variant corresponds to, for
    /// callers that want the C-style numeric contract described in
    /// spec.md §7.
    pub fn code(&self) -> i32 {
        match self {
            DriverError::InvalidArgument { .. } => -1,
            DriverError::Precondition { .. } => -2,
            DriverError::ResourceUnavailable { .. } => -3,
            DriverError::Overflow => -4,
            DriverError::Shutdown => -5,
        }
    }
}
