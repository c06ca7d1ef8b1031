//! Target utilization over time.
//!
//! In curve mode the target follows a cosine over the configured period: the
//! maximum sits at phase 0 and the minimum half a period later, giving one
//! smooth peak and one trough per period (typically a day).

use std::f64::consts::PI;

use crate::config::{ClockReference, CpuConfig, CpuMode};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeCurve {
    mode: CpuMode,
    low: f64,
    high: f64,
    period: i64,
    offset: i64,
}

impl TimeCurve {
    /// Builds the curve and fixes the clock offset for the lifetime of the process.
    pub fn new(config: &CpuConfig) -> Self {
        let utc_offset = match config.clock {
            ClockReference::Local => chrono::Local::now().offset().local_minus_utc() as i64,
            ClockReference::Utc => 0,
        };
        Self::with_utc_offset(config, utc_offset)
    }

    /// Like [`TimeCurve::new`], with an explicit local-minus-UTC difference in seconds.
    pub fn with_utc_offset(config: &CpuConfig, utc_offset: i64) -> Self {
        Self {
            mode: config.mode,
            low: config.low as f64,
            high: config.high as f64,
            period: config.curve_period_secs.max(1) as i64,
            offset: utc_offset + config.curve_peak_secs as i64,
        }
    }

    /// Target utilization in percent at the given unix timestamp.
    pub fn target_at(&self, timestamp: i64) -> f64 {
        match self.mode {
            CpuMode::Fixed => self.low,
            CpuMode::Curve => {
                let phase = (timestamp + self.offset).rem_euclid(self.period) as f64
                    / self.period as f64;
                self.low + (self.high - self.low) * ((phase * PI * 2.0).cos() + 1.0) / 2.0
            }
        }
    }

    pub fn target_now(&self) -> f64 {
        self.target_at(chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CpuConfigBuilder;

    const EPS: f64 = 1e-9;

    fn curve(low: u8, high: u8, period: u64, peak: u64) -> TimeCurve {
        let config = CpuConfigBuilder::default()
            .mode(CpuMode::Curve)
            .low(low)
            .high(high)
            .curve_period_secs(period)
            .curve_peak_secs(peak)
            .clock(ClockReference::Utc)
            .build()
            .unwrap();
        TimeCurve::new(&config)
    }

    #[test]
    fn peak_and_trough() {
        for (low, high, period, peak) in [
            (20, 80, 86400, 13 * 3600),
            (0, 100, 3600, 0),
            (50, 50, 600, 600),
            (10, 11, 7, 3),
        ] {
            let curve = curve(low, high, period, peak);
            let period = period as i64;
            let peak = peak as i64;

            // (t + offset) mod period == 0
            let t_peak = period - peak;
            assert!((curve.target_at(t_peak) - high as f64).abs() < EPS);
            assert!((curve.target_at(t_peak + 5 * period) - high as f64).abs() < EPS);

            if period % 2 == 0 {
                let t_trough = t_peak + period / 2;
                assert!((curve.target_at(t_trough) - low as f64).abs() < EPS);
            }
        }
    }

    #[test]
    fn stays_within_range_and_is_periodic() {
        let curve = curve(25, 75, 1000, 250);
        for t in (-5000..5000).step_by(7) {
            let value = curve.target_at(t);
            assert!((25.0 - EPS..=75.0 + EPS).contains(&value), "{t}: {value}");
            assert!((value - curve.target_at(t + 1000)).abs() < EPS);
        }
    }

    #[test]
    fn is_continuous() {
        let curve = curve(0, 100, 86400, 13 * 3600);
        // max slope of the cosine is pi * amplitude / period per second
        let max_step = PI * 100.0 / 86400.0 + EPS;
        for t in 0..86400 {
            let step = (curve.target_at(t + 1) - curve.target_at(t)).abs();
            assert!(step <= max_step, "{t}: {step}");
        }
    }

    #[test]
    fn local_offset_shifts_the_curve() {
        let config = CpuConfigBuilder::default()
            .mode(CpuMode::Curve)
            .low(0)
            .high(100)
            .curve_period_secs(86400)
            .curve_peak_secs(0)
            .build()
            .unwrap();
        let utc = TimeCurve::with_utc_offset(&config, 0);
        let cet = TimeCurve::with_utc_offset(&config, 3600);

        assert!((utc.target_at(0) - 100.0).abs() < EPS);
        assert!((cet.target_at(-3600) - 100.0).abs() < EPS);
    }

    #[test]
    fn fixed_mode_is_constant() {
        let config = CpuConfigBuilder::default()
            .mode(CpuMode::Fixed)
            .low(42)
            .high(42)
            .build()
            .unwrap();
        let curve = TimeCurve::new(&config);

        for t in [0, 1, 3600, 43200, 1_700_000_000, -99] {
            assert_eq!(curve.target_at(t), 42.0);
        }
        assert_eq!(curve.target_now(), 42.0);
    }
}
