//! Closed-loop controller keeping one logical CPU busy at a target utilization.
//!
//! Each iteration spins for `busy_cycles` cheap operations, sleeps, and then
//! compares the system-wide busy time reported by the kernel against the
//! target. The difference is fed back proportionally into `busy_cycles`,
//! divided by the number of controllers so that independent siblings do not
//! collectively overshoot.

use std::{
    convert::Infallible,
    hint::black_box,
    time::{Duration, Instant},
};

use tracing::{debug, info, trace};

use crate::{
    config::CpuConfig,
    utils::busy_time::{BusyTimeSource, ProcStat},
};

use super::curve::TimeCurve;

pub const CALIBRATION_ITERATIONS: u64 = 10_000_000;
pub const MINIMUM_CYCLES: u64 = 10_000;

/// Wall time covered by one spin + sleep iteration at calibration.
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(100);

/// Burns `cycles` iterations of a computation the optimizer cannot elide.
pub fn squander_time(cycles: u64) {
    let mut accumulator = 0u8;
    for i in 0..cycles {
        accumulator = black_box(accumulator.wrapping_add(i as u8));
    }
    black_box(accumulator);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    iterations: u64,
    elapsed: Duration,
}

impl Calibration {
    pub fn measure() -> Self {
        let start = Instant::now();
        squander_time(CALIBRATION_ITERATIONS);
        Self::from_measurement(CALIBRATION_ITERATIONS, start.elapsed())
    }

    pub fn from_measurement(iterations: u64, elapsed: Duration) -> Self {
        Self {
            iterations,
            elapsed: elapsed.max(Duration::from_micros(1)),
        }
    }

    /// Spin cycles that fit into one control interval.
    pub fn cycles_per_interval(&self) -> f64 {
        self.iterations as f64 * CONTROL_INTERVAL.as_secs_f64() / self.elapsed.as_secs_f64()
    }

    /// Initial busy cycles and sleep for the given target in percent.
    pub fn initial_state(&self, target: f64) -> ControllerState {
        let per_interval = self.cycles_per_interval();
        let busy_cycles = ((per_interval * target / 100.0) as u64).max(MINIMUM_CYCLES);

        let interval_usec = CONTROL_INTERVAL.as_micros() as f64;
        let spin_usec = busy_cycles as f64 / per_interval * interval_usec;
        let sleep = Duration::from_micros((interval_usec - spin_usec).max(0.0) as u64);

        ControllerState::new(busy_cycles, sleep)
    }
}

/// One reading of busy CPU time and wall time, both in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub busy_usec: u64,
    pub wall_usec: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    busy_cycles: u64,
    sleep: Duration,
    last_busy_usec: u64,
    last_wall_usec: u64,
    last_adjustment: i64,
}

impl ControllerState {
    pub fn new(busy_cycles: u64, sleep: Duration) -> Self {
        Self {
            busy_cycles: busy_cycles.max(MINIMUM_CYCLES),
            sleep,
            last_busy_usec: 0,
            last_wall_usec: 0,
            last_adjustment: 0,
        }
    }

    pub fn busy_cycles(&self) -> u64 {
        self.busy_cycles
    }

    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    pub fn last_adjustment(&self) -> i64 {
        self.last_adjustment
    }

    pub fn last_sample(&self) -> Sample {
        Sample {
            busy_usec: self.last_busy_usec,
            wall_usec: self.last_wall_usec,
        }
    }

    /// Feeds back one iteration measured between `start` and `end`.
    ///
    /// `cpu_count` is the number of controllers sharing the system-wide busy
    /// time. Returns the adjustment applied to the busy cycles, or `None` if no
    /// wall time elapsed.
    pub fn record_iteration(
        &mut self,
        start: Sample,
        end: Sample,
        target: f64,
        cpu_count: usize,
    ) -> Option<i64> {
        self.last_busy_usec = end.busy_usec;
        self.last_wall_usec = end.wall_usec;

        let wall = end.wall_usec.saturating_sub(start.wall_usec);
        if wall == 0 {
            return None;
        }

        let cpus = cpu_count.max(1) as f64;
        let busy = end.busy_usec.saturating_sub(start.busy_usec) as f64 / cpus;
        let actual = 100.0 * busy / wall as f64;

        let adjustment = ((target - actual) * self.busy_cycles as f64 / 100.0 / cpus) as i64;
        trace!(
            "last iter: count={} (~{busy:.0} of {wall} usec, {actual:.1}% for target {target:.1}%); adjust={adjustment}",
            self.busy_cycles
        );

        self.apply(adjustment);

        if (adjustment < 0 && self.last_adjustment > 0)
            || (adjustment > 0 && self.last_adjustment < 0)
        {
            trace!(
                "adjusted approximately correctly; spin count {}",
                self.busy_cycles
            );
        }
        self.last_adjustment = adjustment;

        Some(adjustment)
    }

    fn apply(&mut self, adjustment: i64) {
        let magnitude = adjustment.unsigned_abs();

        if adjustment < 0 && self.busy_cycles < magnitude {
            debug!("usage at lower limit");
            self.busy_cycles = MINIMUM_CYCLES;
        } else if adjustment > 0 {
            match self.busy_cycles.checked_add(magnitude) {
                Some(cycles) => self.busy_cycles = cycles.max(MINIMUM_CYCLES),
                None => debug!("usage at upper limit"),
            }
        } else {
            self.busy_cycles = (self.busy_cycles - magnitude).max(MINIMUM_CYCLES);
        }
    }
}

pub struct CpuController<S> {
    cpu_count: usize,
    curve: TimeCurve,
    source: S,
    state: ControllerState,
    origin: Instant,
}

impl CpuController<ProcStat> {
    pub fn try_new(config: &CpuConfig) -> anyhow::Result<Self> {
        Ok(Self::with_source(config, ProcStat::try_new()?))
    }
}

impl<S: BusyTimeSource> CpuController<S> {
    /// Calibrates against the current machine; this spins for a noticeable moment.
    pub fn with_source(config: &CpuConfig, source: S) -> Self {
        let curve = TimeCurve::new(config);
        let target = curve.target_now();

        info!("measuring CPU");
        let calibration = Calibration::measure();
        let state = calibration.initial_state(target);

        debug!(
            "{} iterations in {:?} ({:.0} per interval)",
            calibration.iterations,
            calibration.elapsed,
            calibration.cycles_per_interval()
        );
        info!(
            "est. {target:.0}% util at {} cycles, {} usec sleep",
            state.busy_cycles(),
            state.sleep().as_micros()
        );

        Self {
            cpu_count: config.count,
            curve,
            source,
            state,
            origin: Instant::now(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    fn sample(&mut self) -> anyhow::Result<Sample> {
        Ok(Sample {
            busy_usec: self.source.sample_busy_time()?,
            wall_usec: self.origin.elapsed().as_micros() as u64,
        })
    }

    /// Runs one spin + sleep iteration and feeds its measurement back.
    pub fn iterate(&mut self) -> anyhow::Result<Option<i64>> {
        let start = self.sample()?;

        trace!("spinning (0 to {})...", self.state.busy_cycles());
        squander_time(self.state.busy_cycles());

        trace!("sleeping...");
        std::thread::sleep(self.state.sleep());

        let end = self.sample()?;
        let target = self.curve.target_now();

        debug!(
            "{} iterations; {} busy usec elapsed",
            self.state.busy_cycles(),
            end.busy_usec.saturating_sub(start.busy_usec)
        );

        Ok(self
            .state
            .record_iteration(start, end, target, self.cpu_count))
    }

    pub fn run(mut self) -> anyhow::Result<Infallible> {
        debug!("spinning cpu");
        loop {
            self.iterate()?;
        }
    }
}
