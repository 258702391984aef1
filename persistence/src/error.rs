//! FILENAME: persistence/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate sheet name on load: {0}")]
    DuplicateSheetName(String),

    #[error("malformed cell address {0:?} on sheet {1:?}")]
    MalformedCellAddress(String, String),

    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}
