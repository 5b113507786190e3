//! Riddle catalog: one riddle per challenge cell.

use std::collections::BTreeMap;

use contracts::{Riddle, FINISH_CELL, START_CELL};

use crate::board::BoardError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiddleCatalog {
    by_cell: BTreeMap<u8, Riddle>,
}

impl RiddleCatalog {
    /// Build a catalog, rejecting duplicate cells and cells outside the playable range.
    /// The start and finish cells never carry a riddle.
    pub fn new(riddles: Vec<Riddle>) -> Result<Self, BoardError> {
        let mut by_cell = BTreeMap::new();
        for riddle in riddles {
            if riddle.cell <= START_CELL || riddle.cell >= FINISH_CELL {
                return Err(BoardError::CellOutOfRange(riddle.cell));
            }
            let cell = riddle.cell;
            if by_cell.insert(cell, riddle).is_some() {
                return Err(BoardError::DuplicateRiddleCell(cell));
            }
        }
        Ok(Self { by_cell })
    }

    /// The space-themed catalog shipped with the game.
    pub fn standard() -> Self {
        let riddles = [
            (4, "¿Qué planeta es el más cercano al Sol?", "Mercurio"),
            (7, "¿Cuántos planetas hay en el sistema solar?", "8"),
            (10, "¿Cuál es el planeta más grande?", "Júpiter"),
            (15, "¿Qué planeta es conocido como el Planeta Rojo?", "Marte"),
            (19, "¿Cuál es la estrella más cercana a la Tierra?", "Sol"),
            (24, "¿El agua hierve a 100 grados en qué escala?", "Celsius"),
            (28, "¿Cuál planeta tiene anillos visibles?", "Saturno"),
            (33, "¿Qué gas respiramos principalmente?", "Oxígeno"),
            (38, "¿Cuál es la velocidad aproximada de la luz (km/s)?", "300000"),
            (42, "¿Qué planeta tiene una gran mancha roja?", "Júpiter"),
            (47, "¿Cuál es el gas más abundante en el universo?", "Hidrógeno"),
            (53, "¿En qué unidad medimos la energía eléctrica?", "Joule"),
            (57, "¿Cuál es el planeta más frío del sistema solar?", "Neptuno"),
        ];

        Self {
            by_cell: riddles
                .into_iter()
                .map(|(cell, question, answer)| (cell, Riddle::new(cell, question, answer)))
                .collect(),
        }
    }

    pub fn riddle_at(&self, cell: u8) -> Option<&Riddle> {
        self.by_cell.get(&cell)
    }

    pub fn cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.by_cell.keys().copied()
    }

    pub fn riddles(&self) -> impl Iterator<Item = &Riddle> {
        self.by_cell.values()
    }

    pub fn len(&self) -> usize {
        self.by_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_cell.is_empty()
    }
}

/// Case-insensitive comparison on trimmed text.
pub fn answer_matches(expected: &str, submitted: &str) -> bool {
    expected.trim().to_lowercase() == submitted.trim().to_lowercase()
}
