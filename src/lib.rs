pub mod channel;
pub mod error;
pub mod interrupt;
pub mod motor;
pub mod register_file;
pub mod sensor;

pub use error::DriverError;
pub use interrupt::{InterruptController, InterruptSource};
pub use motor::{Direction, FaultCode, MotorController, MotorState};
pub use register_file::RegisterFile;
pub use sensor::SensorArray;

pub mod prelude {
    pub use crate::{
        channel::{ChannelRecord, CommandKind, ResponseStatus, SharedChannel, StatusSnapshot},
        Direction, DriverError, FaultCode, InterruptController, InterruptSource, MotorController,
        MotorState, RegisterFile, SensorArray,
    };
}

/// The whole owned component set, wired against one register file (spec.md
/// §5's single-threaded cooperative scheduler).
pub struct Driver<'a> {
    pub motor: MotorController<'a>,
    pub sensors: SensorArray<'a>,
    pub interrupts: InterruptController<'a>,
}

impl<'a> Driver<'a> {
    pub fn new(regs: &'a RegisterFile) -> Self {
        Self {
            motor: MotorController::new(regs),
            sensors: SensorArray::new(regs),
            interrupts: InterruptController::new(regs),
        }
    }

    /// The simulation-only half of one cycle: motor update, sensor update,
    /// interrupt dispatch. Used directly by tests that don't need a
    /// channel; [`run_tick`] wraps this with the channel publish/poll steps
    /// for the demo binary and the full-cycle ordering test (spec.md §5).
    pub fn tick(&mut self) {
        self.motor.update();
        self.sensors.update();
        self.interrupts.process_pending();
    }

    /// Snapshot the scalar motor/sensor state into the shape the shared
    /// channel publishes once per tick (spec.md §3).
    pub fn status_snapshot(&self) -> channel::StatusSnapshot {
        let mut sensor_values = [0i32; channel::NUM_SENSOR_SLOTS];
        self.sensors.read_all(&mut sensor_values, sensor_values.len());
        channel::StatusSnapshot {
            motor_state: channel::motor_state_to_u32(self.motor.state()),
            motor_speed: self.motor.current_speed(),
            motor_position: self.motor.position(),
            sensor_values,
            fault_code: channel::fault_code_to_u32(self.motor.fault()),
        }
    }
}

/// The subset of a channel backend's API one cooperative tick needs. Lets
/// [`run_tick`] and its command dispatch run identically over the real
/// [`channel::SharedChannel`] and the in-process fallback.
pub trait TickChannel {
    fn update_status(&self, status: channel::StatusSnapshot);
    fn try_get_command(&self) -> Result<Option<(u32, i32, i32)>, DriverError>;
    fn send_response(&self, status: u32, data: &[i32], n: usize) -> Result<(), DriverError>;
}

impl TickChannel for channel::InMemoryChannel {
    fn update_status(&self, status: channel::StatusSnapshot) {
        channel::InMemoryChannel::update_status(self, status)
    }
    fn try_get_command(&self) -> Result<Option<(u32, i32, i32)>, DriverError> {
        channel::InMemoryChannel::try_get_command(self)
    }
    fn send_response(&self, status: u32, data: &[i32], n: usize) -> Result<(), DriverError> {
        channel::InMemoryChannel::send_response(self, status, data, n)
    }
}

#[cfg(unix)]
impl TickChannel for channel::PosixChannel {
    fn update_status(&self, status: channel::StatusSnapshot) {
        channel::PosixChannel::update_status(self, status)
    }
    fn try_get_command(&self) -> Result<Option<(u32, i32, i32)>, DriverError> {
        channel::PosixChannel::try_get_command(self)
    }
    fn send_response(&self, status: u32, data: &[i32], n: usize) -> Result<(), DriverError> {
        channel::PosixChannel::send_response(self, status, data, n)
    }
}

/// One full cooperative cycle, in the order spec.md §5 requires: motor
/// update, sensor update, interrupt dispatch, status publish, then command
/// poll and dispatch. Shared by the demo binary and the test suite so the
/// ordering is asserted in exactly one place rather than duplicated at
/// every call site.
pub fn run_tick<C: TickChannel>(driver: &mut Driver<'_>, chan: &C) {
    driver.tick();
    chan.update_status(driver.status_snapshot());
    if let Ok(Some((kind, p1, p2))) = chan.try_get_command() {
        dispatch_command(driver, chan, kind, p1, p2);
    }
}

fn dispatch_command<C: TickChannel>(driver: &mut Driver<'_>, chan: &C, kind: u32, p1: i32, p2: i32) {
    use channel::{direction_from_u32, CommandKind, ResponseStatus};

    let result = match kind {
        k if k == CommandKind::MotorStart as u32 => {
            driver.motor.start(p1, direction_from_u32(p2 as u32))
        }
        k if k == CommandKind::MotorStop as u32 => {
            driver.motor.stop();
            Ok(())
        }
        k if k == CommandKind::MotorSetSpeed as u32 => driver.motor.set_speed(p1),
        k if k == CommandKind::Reset as u32 => {
            driver.motor.reset();
            Ok(())
        }
        k if k == CommandKind::SensorRead as u32 || k == CommandKind::GetStatus as u32 => Ok(()),
        _ => {
            chan.send_response(ResponseStatus::InvalidCommand as u32, &[], 0)
                .ok();
            return;
        }
    };

    let status = if result.is_ok() {
        ResponseStatus::Ok
    } else {
        ResponseStatus::Error
    };
    let mut data = [0i32; channel::NUM_SENSOR_SLOTS];
    let n = driver.sensors.read_all(&mut data, data.len());
    chan.send_response(status as u32, &data, n).ok();
}
