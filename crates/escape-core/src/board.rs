//! Static cell classification for the 60-cell track.

use std::collections::BTreeSet;

use contracts::{CellKind, Riddle, FINISH_CELL, START_CELL};
use thiserror::Error;

use crate::riddles::RiddleCatalog;

pub const STANDARD_HAZARD_CELLS: [u8; 8] = [5, 12, 18, 23, 30, 37, 44, 50];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("cell {0} is outside the playable range")]
    CellOutOfRange(u8),
    #[error("more than one riddle is bound to cell {0}")]
    DuplicateRiddleCell(u8),
    #[error("cell {0} is both a hazard and a challenge")]
    HazardChallengeOverlap(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    hazards: BTreeSet<u8>,
    riddles: RiddleCatalog,
}

impl Board {
    pub fn new(
        hazards: impl IntoIterator<Item = u8>,
        riddles: RiddleCatalog,
    ) -> Result<Self, BoardError> {
        let mut hazard_set = BTreeSet::new();
        for cell in hazards {
            if cell <= START_CELL || cell >= FINISH_CELL {
                return Err(BoardError::CellOutOfRange(cell));
            }
            if riddles.riddle_at(cell).is_some() {
                return Err(BoardError::HazardChallengeOverlap(cell));
            }
            hazard_set.insert(cell);
        }

        Ok(Self {
            hazards: hazard_set,
            riddles,
        })
    }

    pub fn standard() -> Self {
        let hazards = STANDARD_HAZARD_CELLS.into_iter().collect();
        Self {
            hazards,
            riddles: RiddleCatalog::standard(),
        }
    }

    /// Cells past the finish classify as `Finish`; the engine clamps before asking.
    pub fn classify(&self, cell: u8) -> CellKind {
        if cell >= FINISH_CELL {
            CellKind::Finish
        } else if self.hazards.contains(&cell) {
            CellKind::Hazard
        } else if self.riddles.riddle_at(cell).is_some() {
            CellKind::Challenge
        } else {
            CellKind::Neutral
        }
    }

    pub fn hazard_cells(&self) -> Vec<u8> {
        self.hazards.iter().copied().collect()
    }

    pub fn challenge_cells(&self) -> Vec<u8> {
        self.riddles.cells().collect()
    }

    pub fn riddle_at(&self, cell: u8) -> Option<&Riddle> {
        self.riddles.riddle_at(cell)
    }

    pub fn riddles(&self) -> &RiddleCatalog {
        &self.riddles
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_board_is_consistent() {
        let board = Board::standard();
        let rebuilt = Board::new(STANDARD_HAZARD_CELLS, RiddleCatalog::standard())
            .expect("standard cells do not overlap");
        assert_eq!(board, rebuilt);

        assert_eq!(board.classify(60), CellKind::Finish);
        assert_eq!(board.classify(5), CellKind::Hazard);
        assert_eq!(board.classify(15), CellKind::Challenge);
        assert_eq!(board.classify(2), CellKind::Neutral);
    }

    #[test]
    fn challenge_cells_follow_catalog() {
        let board = Board::standard();
        let from_catalog: Vec<u8> = board.riddles().cells().collect();
        assert_eq!(board.challenge_cells(), from_catalog);
        for cell in board.challenge_cells() {
            assert_eq!(board.classify(cell), CellKind::Challenge);
        }
    }

    #[test]
    fn overlap_is_rejected() {
        let catalog =
            RiddleCatalog::new(vec![Riddle::new(12, "¿Satélite de la Tierra?", "Luna")])
                .expect("valid catalog");
        assert_eq!(
            Board::new([12], catalog),
            Err(BoardError::HazardChallengeOverlap(12))
        );
    }

    #[test]
    fn every_cell_has_exactly_one_kind() {
        let board = Board::standard();
        let hazards = board.hazard_cells();
        let challenges = board.challenge_cells();
        for cell in START_CELL..=FINISH_CELL {
            let kind = board.classify(cell);
            assert_eq!(kind == CellKind::Hazard, hazards.contains(&cell));
            assert_eq!(kind == CellKind::Challenge, challenges.contains(&cell));
            assert_eq!(kind == CellKind::Finish, cell == FINISH_CELL);
        }
    }
}
