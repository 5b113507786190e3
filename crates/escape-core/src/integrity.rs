//! Ship integrity: decays on a slow tick, repaired to full on a fast tick after a finish.

pub const INTEGRITY_MAX: f64 = 100.0;
pub const INTEGRITY_MIN: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairProgress {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShipIntegrity {
    level: f64,
    repairing: bool,
}

impl Default for ShipIntegrity {
    fn default() -> Self {
        Self {
            level: INTEGRITY_MAX,
            repairing: false,
        }
    }
}

impl ShipIntegrity {
    pub fn new(level: f64, repairing: bool) -> Self {
        Self {
            level: clamp_level(level),
            repairing,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn is_repairing(&self) -> bool {
        self.repairing
    }

    pub fn set_level(&mut self, level: f64) {
        self.level = clamp_level(level);
    }

    /// Returns `true` if the level changed. No effect while repairing.
    pub fn decay(&mut self, amount: f64) -> bool {
        if self.repairing || self.level <= INTEGRITY_MIN {
            return false;
        }
        self.level = clamp_level(self.level - amount.max(0.0));
        true
    }

    pub fn begin_repair(&mut self) {
        self.repairing = true;
    }

    pub fn repair(&mut self, amount: f64) -> RepairProgress {
        if !self.repairing {
            return RepairProgress::Completed;
        }
        self.level = clamp_level(self.level + amount.max(0.0));
        if self.level >= INTEGRITY_MAX {
            self.repairing = false;
            RepairProgress::Completed
        } else {
            RepairProgress::InProgress
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        return INTEGRITY_MIN;
    }
    level.clamp(INTEGRITY_MIN, INTEGRITY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn repair_from_eighty_takes_ten_ticks() {
        let mut integrity = ShipIntegrity::new(80.0, false);
        integrity.begin_repair();
        let mut ticks = 0;
        while integrity.repair(2.0) == RepairProgress::InProgress {
            ticks += 1;
        }
        assert_eq!(ticks + 1, 10);
        assert!(!integrity.is_repairing());
        assert!((integrity.level() - INTEGRITY_MAX).abs() < f64::EPSILON);
    }

    #[test]
    fn decay_is_suspended_while_repairing() {
        let mut integrity = ShipIntegrity::new(50.0, false);
        integrity.begin_repair();
        assert!(!integrity.decay(0.05));
        assert!((integrity.level() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn decay_floors_at_zero() {
        let mut integrity = ShipIntegrity::new(0.03, false);
        assert!(integrity.decay(0.05));
        assert_eq!(integrity.level(), INTEGRITY_MIN);
        assert!(!integrity.decay(0.05));
    }

    proptest! {
        #[test]
        fn level_stays_clamped(
            start in -50.0f64..150.0,
            ops in proptest::collection::vec((any::<bool>(), 0.0f64..30.0), 0..200),
        ) {
            let mut integrity = ShipIntegrity::new(start, false);
            for (repair, amount) in ops {
                if repair {
                    integrity.begin_repair();
                    integrity.repair(amount);
                } else {
                    integrity.decay(amount);
                }
                prop_assert!(integrity.level() >= INTEGRITY_MIN);
                prop_assert!(integrity.level() <= INTEGRITY_MAX);
            }
        }
    }
}
