//! The plain-old-data payload shared by both channel backends (spec.md §3,
//! §4.5). `repr(C)` because the POSIX backend places this struct directly
//! inside a `shm_open` mapping -- its layout must be stable.

use crate::motor::{Direction, FaultCode, MotorState};

pub const MAX_PAYLOAD_WORDS: usize = 8;
pub const NUM_SENSOR_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandKind {
    None = 0,
    MotorStart = 1,
    MotorStop = 2,
    MotorSetSpeed = 3,
    SensorRead = 4,
    GetStatus = 5,
    Reset = 6,
}

impl CommandKind {
    fn from_u32(v: u32) -> CommandKind {
        match v {
            1 => CommandKind::MotorStart,
            2 => CommandKind::MotorStop,
            3 => CommandKind::MotorSetSpeed,
            4 => CommandKind::SensorRead,
            5 => CommandKind::GetStatus,
            6 => CommandKind::Reset,
            _ => CommandKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseStatus {
    Ok = 0,
    Error = 1,
    Busy = 2,
    InvalidCommand = 3,
}

impl ResponseStatus {
    fn from_u32(v: u32) -> ResponseStatus {
        match v {
            0 => ResponseStatus::Ok,
            2 => ResponseStatus::Busy,
            3 => ResponseStatus::InvalidCommand,
            _ => ResponseStatus::Error,
        }
    }
}

/// The status snapshot published once per tick (spec.md §3, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct StatusSnapshot {
    pub motor_state: u32,
    pub motor_speed: i32,
    pub motor_position: i32,
    pub sensor_values: [i32; NUM_SENSOR_SLOTS],
    pub fault_code: u32,
}

impl StatusSnapshot {
    pub fn motor_state(&self) -> MotorState {
        match self.motor_state {
            0 => MotorState::Idle,
            1 => MotorState::Starting,
            2 => MotorState::Running,
            3 => MotorState::Stopping,
            4 => MotorState::Fault,
            _ => MotorState::Recovery,
        }
    }

    pub fn fault_code(&self) -> FaultCode {
        match self.fault_code {
            1 => FaultCode::Stall,
            2 => FaultCode::Overheat,
            3 => FaultCode::Overcurrent,
            _ => FaultCode::None,
        }
    }
}

pub fn motor_state_to_u32(state: MotorState) -> u32 {
    match state {
        MotorState::Idle => 0,
        MotorState::Starting => 1,
        MotorState::Running => 2,
        MotorState::Stopping => 3,
        MotorState::Fault => 4,
        MotorState::Recovery => 5,
    }
}

pub fn fault_code_to_u32(fault: FaultCode) -> u32 {
    match fault {
        FaultCode::None => 0,
        FaultCode::Stall => 1,
        FaultCode::Overheat => 2,
        FaultCode::Overcurrent => 3,
    }
}

pub fn direction_to_u32(dir: Direction) -> u32 {
    match dir {
        Direction::Cw => 0,
        Direction::Ccw => 1,
    }
}

pub fn direction_from_u32(v: u32) -> Direction {
    if v == 1 {
        Direction::Ccw
    } else {
        Direction::Cw
    }
}

/// Everything the channel record carries, `repr(C)` for shared-memory
/// friendliness. Owned by the mutex in both backends; never touched
/// without holding it.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ChannelRecord {
    pub command_kind: u32,
    pub command_p1: i32,
    pub command_p2: i32,
    pub command_pending: bool,

    pub response_status: u32,
    pub response_data: [i32; MAX_PAYLOAD_WORDS],
    pub response_len: u32,
    pub response_ready: bool,

    pub status: StatusSnapshot,
    pub shutdown_requested: bool,
}

impl ChannelRecord {
    pub fn command_kind(&self) -> CommandKind {
        CommandKind::from_u32(self.command_kind)
    }

    pub fn response_status(&self) -> ResponseStatus {
        ResponseStatus::from_u32(self.response_status)
    }
}
