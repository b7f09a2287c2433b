//! Tamper detection on consecutive accelerometer samples.

use crate::mpu6050::RawSample;

/// Integer form of the ±2 g sensitivity.
const ACCEL_LSB_PER_G: i32 = 16384;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Motion {
    /// Largest single-axis change between two samples, in milli-g.
    pub peak_delta_mg: u32,
}

pub struct MotionDetector {
    threshold_mg: u32,
    cooldown_samples: u8,
    previous: Option<[i16; 3]>,
    cooldown: u8,
}

impl MotionDetector {
    pub const fn new(threshold_mg: u32, cooldown_samples: u8) -> Self {
        Self {
            threshold_mg,
            cooldown_samples,
            previous: None,
            cooldown: 0,
        }
    }

    /// Feed one sample. The first sample after construction or [`reset`]
    /// only sets the baseline.
    ///
    /// [`reset`]: MotionDetector::reset
    pub fn update(&mut self, sample: &RawSample) -> Option<Motion> {
        let previous = self.previous.replace(sample.accel)?;

        if self.cooldown > 0 {
            self.cooldown -= 1;
            return None;
        }

        let peak_delta_mg = previous
            .iter()
            .zip(sample.accel.iter())
            .map(|(&a, &b)| lsb_to_mg((b as i32 - a as i32).unsigned_abs()))
            .max()
            .unwrap_or(0);

        if peak_delta_mg <= self.threshold_mg {
            return None;
        }

        self.cooldown = self.cooldown_samples;
        Some(Motion { peak_delta_mg })
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.cooldown = 0;
    }
}

fn lsb_to_mg(lsb: u32) -> u32 {
    lsb * 1000 / ACCEL_LSB_PER_G as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: i16, y: i16, z: i16) -> RawSample {
        RawSample {
            accel: [x, y, z],
            ..Default::default()
        }
    }

    #[test]
    fn first_sample_only_seeds_baseline() {
        let mut detector = MotionDetector::new(150, 0);
        assert_eq!(detector.update(&sample(16384, 0, 0)), None);
    }

    #[test]
    fn small_jitter_is_ignored() {
        let mut detector = MotionDetector::new(150, 0);
        detector.update(&sample(0, 0, 16384));
        // 100 LSB ~ 6 mg
        assert_eq!(detector.update(&sample(100, -100, 16284)), None);
        // exactly at threshold does not trigger: 2458 LSB -> 150 mg
        assert_eq!(detector.update(&sample(100 + 2458, -100, 16284)), None);
    }

    #[test]
    fn reports_peak_axis_delta() {
        let mut detector = MotionDetector::new(150, 0);
        detector.update(&sample(0, 0, 16384));

        // x moves 0.5 g, z moves 0.25 g
        let motion = detector.update(&sample(8192, 0, 12288));
        assert_eq!(motion, Some(Motion { peak_delta_mg: 500 }));
    }

    #[test]
    fn cooldown_suppresses_follow_up_reports() {
        let mut detector = MotionDetector::new(150, 2);
        detector.update(&sample(0, 0, 16384));

        assert!(detector.update(&sample(16384, 0, 0)).is_some());
        assert_eq!(detector.update(&sample(0, 0, 16384)), None);
        assert_eq!(detector.update(&sample(16384, 0, 0)), None);
        assert!(detector.update(&sample(0, 0, 16384)).is_some());
    }

    #[test]
    fn reset_clears_baseline_and_cooldown() {
        let mut detector = MotionDetector::new(150, 5);
        detector.update(&sample(0, 0, 16384));
        assert!(detector.update(&sample(16384, 0, 0)).is_some());

        detector.reset();
        assert_eq!(detector.update(&sample(0, 0, 16384)), None);
        assert!(detector.update(&sample(-16384, 0, 0)).is_some());
    }

    #[test]
    fn full_scale_swing_does_not_overflow() {
        let mut detector = MotionDetector::new(150, 0);
        detector.update(&sample(i16::MIN, 0, 0));
        let motion = detector.update(&sample(i16::MAX, 0, 0));
        assert_eq!(motion, Some(Motion { peak_delta_mg: 3999 }));
    }
}
