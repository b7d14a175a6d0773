//! Calibrated delays
//!
//! Serial-bus edges and FPGA download words need waits of a few hundred
//! nanoseconds to a few microseconds, far below what `thread::sleep`
//! resolves. [`CalibratedDelay`] measures how long one spin iteration takes
//! and busy-waits the matching count. Millisecond waits go to the scheduler.

use crate::error::{Operation, PixieError, Result};
use std::fmt::Debug;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Spin iterations timed during calibration.
pub const CALIBRATION_CYCLES: u64 = 10_000_000;

/// Safety factor applied to the measured cost of one spin iteration.
pub const NS_MULTIPLIER: f64 = 1.0;

/// Source of protocol waits.
pub trait Delay: Debug + Send + Sync {
    /// Busy-wait at least `ns` nanoseconds.
    fn wait_ns(&self, ns: u64);

    /// Busy-wait at least `us` microseconds.
    fn wait_us(&self, us: u64) {
        self.wait_ns(us.saturating_mul(1000));
    }

    /// Yield to the scheduler for at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Busy-wait calibrated against the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct CalibratedDelay {
    ns_per_cycle: f64,
}

impl CalibratedDelay {
    /// Time [`CALIBRATION_CYCLES`] spin iterations and derive the cost of one.
    ///
    /// # Errors
    ///
    /// Returns error if the clock reports no elapsed time, which means it
    /// cannot be used to size waits.
    pub fn calibrate() -> Result<Self> {
        Self::calibrate_with(CALIBRATION_CYCLES)
    }

    /// Calibrate with a custom iteration count.
    ///
    /// # Errors
    ///
    /// See [`calibrate`](Self::calibrate).
    pub fn calibrate_with(cycles: u64) -> Result<Self> {
        if cycles == 0 {
            return Err(PixieError::invalid_argument("calibration needs at least one cycle"));
        }

        let start = Instant::now();
        spin(cycles);
        let elapsed = start.elapsed();

        if elapsed.is_zero() {
            return Err(PixieError::resource(
                Operation::InitSystem,
                -1,
                "delay calibration measured zero elapsed time",
            ));
        }

        #[allow(clippy::cast_precision_loss)]
        let per_cycle = (elapsed.as_nanos() as f64 / cycles as f64).ceil().max(1.0);
        let ns_per_cycle = NS_MULTIPLIER * per_cycle;

        tracing::debug!("Delay calibrated: {ns_per_cycle} ns per cycle ({cycles} cycles in {elapsed:?})");
        Ok(Self { ns_per_cycle })
    }

    /// Build from a known per-iteration cost.
    #[must_use]
    pub const fn from_ns_per_cycle(ns_per_cycle: f64) -> Self {
        Self { ns_per_cycle }
    }

    /// Measured nanoseconds per spin iteration.
    #[must_use]
    pub const fn ns_per_cycle(&self) -> f64 {
        self.ns_per_cycle
    }

    /// Spin iterations needed to cover `ns`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cycles_for(&self, ns: u64) -> u64 {
        (ns as f64 / self.ns_per_cycle).ceil() as u64
    }
}

impl Delay for CalibratedDelay {
    fn wait_ns(&self, ns: u64) {
        spin(self.cycles_for(ns));
    }
}

fn spin(cycles: u64) {
    let mut i = 0u64;
    while black_box(i) < cycles {
        std::hint::spin_loop();
        i += 1;
    }
}

/// Delay that returns immediately. For tests and simulated hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn wait_ns(&self, _ns: u64) {}

    fn sleep_ms(&self, _ms: u64) {}
}
