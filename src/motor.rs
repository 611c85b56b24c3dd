//! The motor state machine (spec.md §3, §4.2).

use tracing::{debug, warn};

use crate::error::DriverError;
use crate::register_file::{offset, MotorCtrlBits, MotorStatusBits, RegisterFile};

/// RPM ramp step applied per tick while starting, running, or stopping.
const RAMP_STEP: i32 = 500;
/// Maximum commandable speed, in RPM.
pub const MAX_SPEED: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Fault,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    None,
    Stall,
    Overheat,
    Overcurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cw,
    Ccw,
}

/// Owns the motor state machine and mirrors it into the register file's
/// `MOTOR_CTRL`/`MOTOR_STATUS`/`MOTOR_SPEED`/`MOTOR_POSITION` words.
pub struct MotorController<'a> {
    regs: &'a RegisterFile,
    state: MotorState,
    fault: FaultCode,
    target_speed: i32,
    current_speed: i32,
    direction: Direction,
    position: i32,
}

impl<'a> MotorController<'a> {
    /// Attach to a register file. The file is borrowed, not owned.
    pub fn new(regs: &'a RegisterFile) -> Self {
        regs.write(offset::MOTOR_CTRL, 0);
        regs.write(offset::MOTOR_STATUS, 0);
        regs.write(offset::MOTOR_SPEED, 0);
        regs.write(offset::MOTOR_POSITION, 0);
        Self {
            regs,
            state: MotorState::Idle,
            fault: FaultCode::None,
            target_speed: 0,
            current_speed: 0,
            direction: Direction::Cw,
            position: 0,
        }
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    pub fn fault(&self) -> FaultCode {
        self.fault
    }

    pub fn current_speed(&self) -> i32 {
        self.current_speed
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    /// Command a start. Rejected while in `Fault`.
    pub fn start(&mut self, speed: i32, direction: Direction) -> Result<(), DriverError> {
        if self.state == MotorState::Fault {
            return Err(DriverError::Precondition {
                what: "cannot start while in Fault",
            });
        }
        self.target_speed = speed.clamp(0, MAX_SPEED);
        self.direction = direction;
        self.state = MotorState::Starting;

        let mut ctrl = MotorCtrlBits::ENABLE;
        if direction == Direction::Cw {
            ctrl |= MotorCtrlBits::DIR_CW;
        }
        self.regs.write(offset::MOTOR_CTRL, ctrl.bits());
        debug!(target = self.target_speed, ?direction, "motor start");
        Ok(())
    }

    /// Begin a ramp-down to zero. No-op if already `Idle`.
    pub fn stop(&mut self) {
        if self.state == MotorState::Idle {
            return;
        }
        self.state = MotorState::Stopping;
        self.regs.clear_bits(offset::MOTOR_CTRL, MotorCtrlBits::ENABLE.bits());
        debug!("motor stop");
    }

    /// Force an immediate stop. Position is preserved.
    pub fn brake(&mut self) {
        self.state = MotorState::Idle;
        self.current_speed = 0;
        self.target_speed = 0;
        self.regs.write(offset::MOTOR_SPEED, 0);
        self.regs
            .clear_bits(offset::MOTOR_STATUS, MotorStatusBits::RUNNING.bits());
        self.regs
            .clear_bits(offset::MOTOR_CTRL, MotorCtrlBits::ENABLE.bits());
        self.regs.set_bits(offset::MOTOR_CTRL, MotorCtrlBits::BRAKE.bits());
        debug!("motor brake");
    }

    /// Update the target speed; the ramp enacts it over subsequent ticks.
    pub fn set_speed(&mut self, speed: i32) -> Result<(), DriverError> {
        if self.state == MotorState::Fault {
            return Err(DriverError::Precondition {
                what: "cannot set speed while in Fault",
            });
        }
        self.target_speed = speed.clamp(0, MAX_SPEED);
        Ok(())
    }

    /// Pulse `RESET`, clear status/speed, and return to `Idle`/`None`.
    /// Position is *not* reset (spec.md §9(d)).
    pub fn reset(&mut self) {
        self.regs.set_bits(offset::MOTOR_CTRL, MotorCtrlBits::RESET.bits());
        self.regs.write(offset::MOTOR_STATUS, 0);
        self.regs.write(offset::MOTOR_SPEED, 0);
        self.regs.clear_bits(offset::MOTOR_CTRL, MotorCtrlBits::RESET.bits());
        self.state = MotorState::Idle;
        self.fault = FaultCode::None;
        self.current_speed = 0;
        self.target_speed = 0;
        debug!(position = self.position, "motor reset");
    }

    /// Force a fault for test/simulation purposes.
    pub fn inject_fault(&mut self, fault: FaultCode) {
        self.state = MotorState::Fault;
        self.fault = fault;
        let bit = match fault {
            FaultCode::Stall => MotorStatusBits::STALL,
            FaultCode::Overheat => MotorStatusBits::OVERHEAT,
            FaultCode::Overcurrent | FaultCode::None => MotorStatusBits::FAULT,
        };
        self.regs.set_bits(offset::MOTOR_STATUS, bit.bits());
        self.regs
            .clear_bits(offset::MOTOR_CTRL, MotorCtrlBits::ENABLE.bits());
        warn!(?fault, "motor fault injected");
    }

    /// Legal only from `Fault`. Transitions to `Recovery`.
    pub fn clear_fault(&mut self) -> Result<(), DriverError> {
        if self.state != MotorState::Fault {
            return Err(DriverError::Precondition {
                what: "clear_fault is only legal from Fault",
            });
        }
        self.state = MotorState::Recovery;
        self.fault = FaultCode::None;
        self.regs.write(offset::MOTOR_STATUS, 0);
        debug!("motor fault cleared, entering Recovery");
        Ok(())
    }

    /// One tick of the state machine (spec.md §4.2).
    pub fn update(&mut self) {
        let status = self.regs.read(offset::MOTOR_STATUS);
        let status = MotorStatusBits::from_bits_truncate(status);
        if self.state != MotorState::Fault
            && (status.intersects(
                MotorStatusBits::FAULT | MotorStatusBits::STALL | MotorStatusBits::OVERHEAT,
            ))
        {
            self.fault = if status.contains(MotorStatusBits::STALL) {
                FaultCode::Stall
            } else if status.contains(MotorStatusBits::OVERHEAT) {
                FaultCode::Overheat
            } else {
                FaultCode::Overcurrent
            };
            self.state = MotorState::Fault;
            self.regs
                .clear_bits(offset::MOTOR_CTRL, MotorCtrlBits::ENABLE.bits());
            warn!(fault = ?self.fault, "motor entering Fault from status register");
            return;
        }

        match self.state {
            MotorState::Idle => {}
            MotorState::Starting => {
                self.ramp_toward_target();
                self.regs.write(offset::MOTOR_SPEED, self.current_speed as u32);
                self.regs
                    .set_bits(offset::MOTOR_STATUS, MotorStatusBits::RUNNING.bits());
                if self.current_speed == self.target_speed {
                    self.state = MotorState::Running;
                    debug!(speed = self.current_speed, "motor reached target, Running");
                }
            }
            MotorState::Running => {
                self.ramp_toward_target();
                self.regs.write(offset::MOTOR_SPEED, self.current_speed as u32);
                let step = self.current_speed / 100;
                self.position = match self.direction {
                    Direction::Cw => self.position.saturating_add(step),
                    Direction::Ccw => self.position.saturating_sub(step),
                };
                self.regs
                    .write(offset::MOTOR_POSITION, self.position as u32);
            }
            MotorState::Stopping => {
                self.current_speed -= RAMP_STEP;
                if self.current_speed <= 0 {
                    self.current_speed = 0;
                    self.state = MotorState::Idle;
                    self.regs
                        .clear_bits(offset::MOTOR_STATUS, MotorStatusBits::RUNNING.bits());
                    debug!("motor stopped, Idle");
                }
                self.regs.write(offset::MOTOR_SPEED, self.current_speed as u32);
            }
            MotorState::Fault => {}
            MotorState::Recovery => {
                self.state = MotorState::Idle;
                debug!("motor recovered, Idle");
            }
        }
    }

    fn ramp_toward_target(&mut self) {
        if self.current_speed < self.target_speed {
            self.current_speed = (self.current_speed + RAMP_STEP).min(self.target_speed);
        } else if self.current_speed > self.target_speed {
            self.current_speed = (self.current_speed - RAMP_STEP).max(self.target_speed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn start_cruise_stop() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(5000, Direction::Cw).unwrap();
        assert_eq!(m.state(), MotorState::Starting);
        for _ in 0..20 {
            m.update();
        }
        assert_eq!(m.state(), MotorState::Running);
        assert_eq!(m.current_speed(), 5000);
        let ctrl = rf.read(offset::MOTOR_CTRL);
        assert!(MotorCtrlBits::from_bits_truncate(ctrl).contains(MotorCtrlBits::ENABLE));
        assert!(MotorCtrlBits::from_bits_truncate(ctrl).contains(MotorCtrlBits::DIR_CW));
        let status = MotorStatusBits::from_bits_truncate(rf.read(offset::MOTOR_STATUS));
        assert!(status.contains(MotorStatusBits::RUNNING));

        m.stop();
        assert_eq!(m.state(), MotorState::Stopping);
        for _ in 0..20 {
            m.update();
        }
        assert_eq!(m.state(), MotorState::Idle);
        assert_eq!(m.current_speed(), 0);
        let status = MotorStatusBits::from_bits_truncate(rf.read(offset::MOTOR_STATUS));
        assert!(!status.contains(MotorStatusBits::RUNNING));
    }

    #[test]
    fn max_speed_clamp() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(99_999, Direction::Cw).unwrap();
        for _ in 0..50 {
            m.update();
        }
        assert_eq!(m.current_speed(), MAX_SPEED);
    }

    #[test]
    fn direction_sign_on_position() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(1000, Direction::Cw).unwrap();
        for _ in 0..20 {
            m.update();
        }
        assert!(m.position() > 0);

        m.reset();
        m.start(1000, Direction::Ccw).unwrap();
        for _ in 0..20 {
            m.update();
        }
        assert!(m.position() < 0);
    }

    #[test]
    fn fault_and_recovery() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(5000, Direction::Cw).unwrap();
        m.inject_fault(FaultCode::Stall);
        assert_eq!(m.state(), MotorState::Fault);
        assert_eq!(m.fault(), FaultCode::Stall);
        let status = MotorStatusBits::from_bits_truncate(rf.read(offset::MOTOR_STATUS));
        assert!(status.contains(MotorStatusBits::STALL));
        let ctrl = MotorCtrlBits::from_bits_truncate(rf.read(offset::MOTOR_CTRL));
        assert!(
            !ctrl.contains(MotorCtrlBits::ENABLE),
            "ENABLE must clear on entry to Fault"
        );

        m.clear_fault().unwrap();
        assert_eq!(m.state(), MotorState::Recovery);
        m.update();
        assert_eq!(m.state(), MotorState::Idle);
        assert_eq!(m.fault(), FaultCode::None);
    }

    #[test]
    fn status_register_fault_also_clears_enable() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(5000, Direction::Cw).unwrap();
        for _ in 0..20 {
            m.update();
        }
        assert_eq!(m.state(), MotorState::Running);

        // Simulate a fault surfacing through the status register directly,
        // as a real device would, rather than through inject_fault.
        rf.set_bits(offset::MOTOR_STATUS, MotorStatusBits::OVERHEAT.bits());
        m.update();
        assert_eq!(m.state(), MotorState::Fault);
        assert_eq!(m.fault(), FaultCode::Overheat);
        let ctrl = MotorCtrlBits::from_bits_truncate(rf.read(offset::MOTOR_CTRL));
        assert!(!ctrl.contains(MotorCtrlBits::ENABLE));
    }

    #[test]
    fn reset_preserves_position() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.start(1000, Direction::Cw).unwrap();
        for _ in 0..20 {
            m.update();
        }
        let pos_before = m.position();
        assert!(pos_before != 0);
        m.reset();
        assert_eq!(m.position(), pos_before);
    }

    #[test]
    fn start_while_fault_is_rejected() {
        let rf = RegisterFile::new();
        let mut m = MotorController::new(&rf);
        m.inject_fault(FaultCode::Overheat);
        assert!(m.start(1000, Direction::Cw).is_err());
    }

    proptest! {
        /// Invariant 3 (spec.md §8): current_speed is monotonically
        /// non-decreasing toward min(s, MAX_SPEED) and never exceeds it.
        #[test]
        fn prop_ramp_is_monotonic_and_bounded(
            speed in 0i32..=20_000,
            ticks in 0u32..60,
        ) {
            let rf = RegisterFile::new();
            let mut m = MotorController::new(&rf);
            m.start(speed, Direction::Cw).unwrap();
            let target = speed.clamp(0, MAX_SPEED);
            let mut prev = m.current_speed();
            for _ in 0..ticks {
                m.update();
                let cur = m.current_speed();
                prop_assert!(cur >= prev);
                prop_assert!(cur <= target);
                prev = cur;
            }
        }
    }
}
