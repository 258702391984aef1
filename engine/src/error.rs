//! FILENAME: engine/src/error.rs

use thiserror::Error;

use crate::coord::CellCoord;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("sheet name already in use: {0}")]
    DuplicateSheetName(String),

    #[error("invalid sheet name: {0:?}")]
    InvalidSheetName(String),

    #[error("no such sheet: {0}")]
    SheetNotFound(String),

    #[error("cell coordinate out of bounds: {0}")]
    OutOfBounds(CellCoord),

    #[error("invalid formula in {coord}: {message}")]
    InvalidFormula { coord: CellCoord, message: String },
}
