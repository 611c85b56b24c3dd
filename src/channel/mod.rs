//! The cross-process command/response channel (spec.md §3, §4.5, §6).
//!
//! Two backends share one contract: a blocking command queue of depth one,
//! a blocking response slot, a periodically-published status snapshot, and
//! a shutdown flag observable by both sides. [`SharedChannel`] resolves to
//! the real POSIX shared-memory backend on unix hosts and falls back to the
//! in-process equivalent everywhere else (spec.md §6).

pub mod inmemory;
pub mod record;

#[cfg(unix)]
pub mod posix;

pub use inmemory::InMemoryChannel;
pub use record::{
    direction_from_u32, direction_to_u32, fault_code_to_u32, motor_state_to_u32, ChannelRecord,
    CommandKind, ResponseStatus, StatusSnapshot, MAX_PAYLOAD_WORDS, NUM_SENSOR_SLOTS,
};

#[cfg(unix)]
pub use posix::PosixChannel;

/// Default shared-memory object name used by the demo binary and the
/// end-to-end tests (spec.md §6).
pub const SHM_NAME: &str = "/motor_driver_shm";

/// The channel type this platform uses by default: real POSIX shared
/// memory on unix, the in-process fallback everywhere else.
#[cfg(unix)]
pub type SharedChannel = PosixChannel;

#[cfg(not(unix))]
pub type SharedChannel = InMemoryChannel;
