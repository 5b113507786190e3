use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DIE_FACES: u8 = 6;

/// Source of d6 values.
pub trait Dice: Send {
    /// A value in `1..=6`.
    fn roll(&mut self) -> u8;
}

#[derive(Debug, Clone)]
pub struct RngDice {
    rng: StdRng,
}

impl RngDice {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Dice for RngDice {
    fn roll(&mut self) -> u8 {
        self.rng.random_range(1..=DIE_FACES)
    }
}

/// Replays a fixed script, cycling when exhausted. Out-of-range faces are clamped into `1..=6`.
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    faces: VecDeque<u8>,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u8>) -> Self {
        let faces: VecDeque<u8> = faces.into_iter().collect();
        Self {
            faces: if faces.is_empty() {
                VecDeque::from([1])
            } else {
                faces
            },
        }
    }
}

impl Dice for ScriptedDice {
    fn roll(&mut self) -> u8 {
        let face = self.faces.pop_front().unwrap_or(1);
        self.faces.push_back(face);
        face.clamp(1, DIE_FACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_dice_stay_in_range_and_repeat() {
        let mut first = RngDice::seeded(7);
        let mut second = RngDice::seeded(7);
        for _ in 0..500 {
            let face = first.roll();
            assert!((1..=DIE_FACES).contains(&face));
            assert_eq!(face, second.roll());
        }
    }

    #[test]
    fn scripted_dice_cycle() {
        let mut dice = ScriptedDice::new([4, 9]);
        assert_eq!(dice.roll(), 4);
        assert_eq!(dice.roll(), 6);
        assert_eq!(dice.roll(), 4);
    }
}
