//! Demo binary: runs the wired [`motor_driver_sim::Driver`] on a fixed tick
//! interval via [`motor_driver_sim::run_tick`], publishing status over the
//! default [`SharedChannel`] and draining commands with
//! `try_get_command` so the tick loop never blocks on a peer (spec.md
//! §9(a): polling wins over a second blocking thread for a single-threaded
//! driver loop).
//!
//! `SIGUSR1`/`SIGUSR2` are wired to [`interrupt::signal_trigger`] to
//! exercise the asynchronous half of the interrupt controller the way a
//! real ISR would (spec.md §6's "line A -> MotorFault, line B ->
//! SensorReady" example); `SIGINT`/`SIGTERM` request a clean shutdown. The
//! two custom lines are registered with `signal_hook::low_level::register`
//! rather than the `Signals` iterator so their dispositions can be
//! restored with `low_level::unregister` once the tick loop exits
//! (spec.md §4.4: interrupt teardown restores default dispositions for the
//! signal lines used to simulate hardware interrupts).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::{flag, low_level};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use motor_driver_sim::channel::{SharedChannel, SHM_NAME};
use motor_driver_sim::{interrupt, run_tick, Driver, InterruptSource, RegisterFile};

/// Runtime configuration, overridable by environment variable so the demo
/// can be driven from a test harness without recompiling.
struct DemoConfig {
    tick: Duration,
    shm_name: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            shm_name: SHM_NAME.to_string(),
        }
    }
}

impl DemoConfig {
    fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ms) = std::env::var("MOTORD_TICK_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                cfg.tick = Duration::from_millis(ms);
            }
        }
        if let Ok(name) = std::env::var("MOTORD_SHM_NAME") {
            cfg.shm_name = name;
        }
        cfg
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = DemoConfig::from_env();
    info!(shm_name = %cfg.shm_name, tick_ms = cfg.tick.as_millis(), "starting motor driver demo");

    let regs = RegisterFile::new();
    let mut driver = Driver::new(&regs);
    driver.interrupts.init();
    driver.interrupts.enable_all();

    match create_channel(&cfg.shm_name) {
        Ok(chan) => {
            run_with_signals(&mut driver, &chan, &cfg);
            destroy_channel(chan);
        }
        Err(e) => {
            warn!(error = %e, "falling back to an in-memory channel");
            run_in_memory(&mut driver, &cfg);
        }
    }
}

#[cfg(unix)]
fn create_channel(name: &str) -> Result<SharedChannel, motor_driver_sim::DriverError> {
    SharedChannel::create(name)
}

#[cfg(not(unix))]
fn create_channel(_name: &str) -> Result<SharedChannel, motor_driver_sim::DriverError> {
    SharedChannel::create()
}

#[cfg(unix)]
fn destroy_channel(chan: SharedChannel) {
    if let Err(e) = chan.destroy() {
        warn!(error = %e, "error destroying shared channel");
    }
}

#[cfg(not(unix))]
fn destroy_channel(chan: SharedChannel) {
    chan.destroy();
}

/// Registers the two custom interrupt lines and returns the ids
/// `low_level::unregister` needs to restore their default dispositions.
///
/// # Safety
/// The registered closure only calls [`interrupt::signal_trigger`], which
/// is documented async-signal-safe (atomics only, no allocation, no
/// locking).
fn register_interrupt_lines() -> [low_level::SigId; 2] {
    unsafe {
        [
            low_level::register(SIGUSR1, || {
                interrupt::signal_trigger(InterruptSource::MotorFault)
            })
            .expect("register SIGUSR1"),
            low_level::register(SIGUSR2, || {
                interrupt::signal_trigger(InterruptSource::SensorReady)
            })
            .expect("register SIGUSR2"),
        ]
    }
}

fn unregister_interrupt_lines(ids: [low_level::SigId; 2]) {
    for id in ids {
        low_level::unregister(id);
    }
    info!("restored default dispositions for SIGUSR1/SIGUSR2");
}

/// Installs OS signal handling and runs the tick loop against a real
/// [`SharedChannel`].
fn run_with_signals(driver: &mut Driver<'_>, chan: &SharedChannel, cfg: &DemoConfig) {
    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&shutdown)).expect("register SIGINT");
    flag::register(SIGTERM, Arc::clone(&shutdown)).expect("register SIGTERM");

    let irq_line_ids = register_interrupt_lines();

    while !shutdown.load(Ordering::Relaxed) && !chan.is_shutdown_requested() {
        run_tick(driver, chan);
        std::thread::sleep(cfg.tick);
    }

    chan.request_shutdown();
    unregister_interrupt_lines(irq_line_ids);
    info!("shutdown requested, exiting tick loop");
}

/// Same loop body, used when no real shared-memory segment could be
/// created.
fn run_in_memory(driver: &mut Driver<'_>, cfg: &DemoConfig) {
    use motor_driver_sim::channel::InMemoryChannel;

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&shutdown)).expect("register SIGINT");
    flag::register(SIGTERM, Arc::clone(&shutdown)).expect("register SIGTERM");

    let chan = InMemoryChannel::create().expect("in-memory channel never fails to create");
    let irq_line_ids = register_interrupt_lines();
    while !shutdown.load(Ordering::Relaxed) && !chan.is_shutdown_requested() {
        run_tick(driver, &chan);
        std::thread::sleep(cfg.tick);
    }
    unregister_interrupt_lines(irq_line_ids);
}
