//! The vectored interrupt controller (spec.md §3, §4.4, §9).
//!
//! Dispatch happens only from [`InterruptController::process_pending`],
//! called from the cooperative tick loop. A host-level asynchronous source
//! (a signal handler, in the demo binary) may only touch the atomic latch
//! and pending mask -- never the handler closures -- which is why those
//! fields live in a separate [`InterruptState`] reachable through a
//! process-wide [`AtomicPtr`], rather than through the controller itself.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use tracing::{debug, trace};

use crate::error::DriverError;
use crate::register_file::{offset, RegisterFile};

pub const NUM_SOURCES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    MotorFault,
    MotorStall,
    SensorReady,
    SensorError,
    Timer,
}

impl InterruptSource {
    pub const ALL: [InterruptSource; NUM_SOURCES] = [
        InterruptSource::MotorFault,
        InterruptSource::MotorStall,
        InterruptSource::SensorReady,
        InterruptSource::SensorError,
        InterruptSource::Timer,
    ];

    pub fn index(self) -> usize {
        match self {
            InterruptSource::MotorFault => 0,
            InterruptSource::MotorStall => 1,
            InterruptSource::SensorReady => 2,
            InterruptSource::SensorError => 3,
            InterruptSource::Timer => 4,
        }
    }

    fn bit(self) -> u32 {
        1 << self.index()
    }

    fn from_index(i: usize) -> Option<InterruptSource> {
        InterruptSource::ALL.get(i).copied()
    }
}

/// The subset of controller state the asynchronous trigger path is allowed
/// to touch: a latch plus a bitmask, both atomic, no locks.
struct InterruptState {
    signal_received: AtomicBool,
    pending_mask: AtomicU32,
    enabled_mask: AtomicU32,
}

impl InterruptState {
    const fn new() -> Self {
        Self {
            signal_received: AtomicBool::new(false),
            pending_mask: AtomicU32::new(0),
            enabled_mask: AtomicU32::new(0),
        }
    }
}

/// Process-wide handle the async trigger path reads with acquire ordering.
/// Installed by [`InterruptController::init`], cleared by
/// [`InterruptController::cleanup`].
static ACTIVE_STATE: AtomicPtr<InterruptState> = AtomicPtr::new(std::ptr::null_mut());

/// Called from asynchronous (signal-like) context. Touches only atomics;
/// never runs a handler. Mirrors spec.md §6's "line A -> MotorFault,
/// line B -> SensorReady" mapping.
pub fn signal_trigger(source: InterruptSource) {
    let ptr = ACTIVE_STATE.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was installed by `init` and is only cleared by
    // `cleanup`, which happens-after every controller method returns (the
    // controller is dropped only after cleanup is called); the pointee
    // outlives any call to this function because `init` takes `&'static`
    // storage owned by the controller for its whole lifetime.
    let state = unsafe { &*ptr };
    if state.enabled_mask.load(Ordering::Acquire) & source.bit() == 0 {
        return;
    }
    state.pending_mask.fetch_or(source.bit(), Ordering::AcqRel);
    state.signal_received.store(true, Ordering::Release);
}

pub type Handler<'a> = Box<dyn FnMut() + 'a>;

/// Owns enabled/pending masks, per-source handlers, and the register-file
/// mirror of `IRQ_STATUS`/`IRQ_ENABLE`.
pub struct InterruptController<'a> {
    regs: &'a RegisterFile,
    handlers: [Option<Handler<'a>>; NUM_SOURCES],
    state: Box<InterruptState>,
    installed: bool,
}

impl<'a> InterruptController<'a> {
    pub fn new(regs: &'a RegisterFile) -> Self {
        regs.write(offset::IRQ_STATUS, 0);
        regs.write(offset::IRQ_ENABLE, 0);
        Self {
            regs,
            handlers: [None, None, None, None, None],
            state: Box::new(InterruptState::new()),
            installed: false,
        }
    }

    /// Install this instance as the process-wide target of
    /// [`signal_trigger`]. Required because the async path has no other
    /// way to find a controller.
    pub fn init(&mut self) {
        let ptr: *mut InterruptState = &mut *self.state;
        ACTIVE_STATE.store(ptr, Ordering::Release);
        self.installed = true;
        debug!("interrupt controller installed");
    }

    pub fn register_handler(
        &mut self,
        source: InterruptSource,
        handler: Handler<'a>,
    ) -> Result<(), DriverError> {
        self.handlers[source.index()] = Some(handler);
        Ok(())
    }

    pub fn unregister_handler(&mut self, source: InterruptSource) {
        self.handlers[source.index()] = None;
    }

    pub fn enable(&mut self, source: InterruptSource) {
        self.state.enabled_mask.fetch_or(source.bit(), Ordering::AcqRel);
        self.regs.set_bits(offset::IRQ_ENABLE, source.bit());
    }

    pub fn disable(&mut self, source: InterruptSource) {
        self.state.enabled_mask.fetch_and(!source.bit(), Ordering::AcqRel);
        self.regs.clear_bits(offset::IRQ_ENABLE, source.bit());
    }

    pub fn enable_all(&mut self) {
        for s in InterruptSource::ALL {
            self.enable(s);
        }
    }

    pub fn disable_all(&mut self) {
        for s in InterruptSource::ALL {
            self.disable(s);
        }
    }

    /// Idempotent pend: dropped silently if `source` is not enabled.
    pub fn trigger(&mut self, source: InterruptSource) {
        if self.state.enabled_mask.load(Ordering::Acquire) & source.bit() == 0 {
            return;
        }
        self.state.pending_mask.fetch_or(source.bit(), Ordering::AcqRel);
        self.regs.set_bits(offset::IRQ_STATUS, source.bit());
        trace!(?source, "interrupt pended");
    }

    pub fn is_pending(&self, source: InterruptSource) -> bool {
        self.state.pending_mask.load(Ordering::Acquire) & source.bit() != 0
    }

    pub fn pending_mask(&self) -> u32 {
        self.state.pending_mask.load(Ordering::Acquire)
    }

    pub fn clear(&mut self, source: InterruptSource) {
        self.state.pending_mask.fetch_and(!source.bit(), Ordering::AcqRel);
        self.regs.clear_bits(offset::IRQ_STATUS, source.bit());
    }

    /// Must be called from the tick loop. Drains the async latch, then
    /// dispatches every pending, handler-bearing source in ascending
    /// numerical order, then clears `pending_mask` entirely.
    pub fn process_pending(&mut self) {
        if self.state.signal_received.swap(false, Ordering::AcqRel) {
            self.trigger(InterruptSource::Timer);
        }

        let pending = self.state.pending_mask.load(Ordering::Acquire);
        for i in 0..NUM_SOURCES {
            let source = InterruptSource::from_index(i).expect("index within NUM_SOURCES");
            if pending & source.bit() == 0 {
                continue;
            }
            if let Some(handler) = self.handlers[i].as_mut() {
                trace!(?source, "dispatching interrupt handler");
                handler();
            }
        }

        self.state.pending_mask.store(0, Ordering::Release);
        self.regs.write(offset::IRQ_STATUS, 0);
    }

    /// Disable all sources and uninstall the process-wide pointer. This
    /// controller never registers OS signal dispositions itself (it has no
    /// notion of signals, only of `signal_trigger` calls); a host that maps
    /// real signal lines onto sources, as the demo binary does, is
    /// responsible for restoring their default dispositions on its own
    /// shutdown path once this controller is no longer installed.
    pub fn cleanup(&mut self) {
        self.disable_all();
        if self.installed {
            ACTIVE_STATE.compare_exchange(
                &mut *self.state as *mut InterruptState,
                std::ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ).ok();
            self.installed = false;
        }
        debug!("interrupt controller cleaned up");
    }
}

impl Drop for InterruptController<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn enable_then_trigger_pends() {
        let rf = RegisterFile::new();
        let mut ic = InterruptController::new(&rf);
        ic.enable(InterruptSource::MotorFault);
        ic.trigger(InterruptSource::MotorFault);
        assert!(ic.is_pending(InterruptSource::MotorFault));
    }

    #[test]
    fn disable_then_trigger_is_dropped() {
        let rf = RegisterFile::new();
        let mut ic = InterruptController::new(&rf);
        ic.disable(InterruptSource::MotorFault);
        ic.trigger(InterruptSource::MotorFault);
        assert!(!ic.is_pending(InterruptSource::MotorFault));
    }

    #[test]
    fn process_pending_invokes_handler_exactly_once_and_clears_mask() {
        let rf = RegisterFile::new();
        let mut ic = InterruptController::new(&rf);
        let calls = RefCell::new(0u32);
        ic.register_handler(
            InterruptSource::MotorFault,
            Box::new(|| {
                *calls.borrow_mut() += 1;
            }),
        )
        .unwrap();
        ic.enable(InterruptSource::MotorFault);
        ic.trigger(InterruptSource::MotorFault);
        ic.process_pending();
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(ic.pending_mask(), 0);
    }

    #[test]
    fn dispatch_order_is_numerical_ascending() {
        let rf = RegisterFile::new();
        let mut ic = InterruptController::new(&rf);
        let order = RefCell::new(Vec::new());
        for s in InterruptSource::ALL {
            ic.enable(s);
        }
        // Register handlers in reverse to prove dispatch order is by
        // source index, not registration order.
        for s in InterruptSource::ALL.iter().rev() {
            let s = *s;
            ic.register_handler(
                s,
                Box::new(move || order.borrow_mut().push(s.index())),
            )
            .unwrap();
        }
        for s in InterruptSource::ALL {
            ic.trigger(s);
        }
        ic.process_pending();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn signal_path_defers_dispatch_to_process_pending() {
        let rf = RegisterFile::new();
        let mut ic = InterruptController::new(&rf);
        ic.init();
        let calls = RefCell::new(0u32);
        ic.register_handler(
            InterruptSource::MotorFault,
            Box::new(|| {
                *calls.borrow_mut() += 1;
            }),
        )
        .unwrap();
        ic.enable(InterruptSource::MotorFault);
        signal_trigger(InterruptSource::MotorFault);
        assert_eq!(*calls.borrow(), 0, "dispatch must be deferred");
        ic.process_pending();
        assert_eq!(*calls.borrow(), 1);
        ic.cleanup();
    }
}
