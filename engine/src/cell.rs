//! FILENAME: engine/src/cell.rs
//! PURPOSE: Defines the fundamental data structures for a single spreadsheet cell.
//! CONTEXT: Separates raw contents from the parsed AST and the last computed
//! value, per the store's "contents / parsed AST / current value / direct
//! dependency set" data model.

use std::collections::HashSet;

use parser::{CellErrorKind, Expression};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::coord::CellCoord;

/// Serializes a `CellErrorKind` via its canonical string rather than
/// deriving Serialize on the type itself, so the dependency-free parser
/// crate never has to take on serde as a dependency.
mod error_kind_serde {
    use super::*;

    pub fn serialize<S>(kind: &CellErrorKind, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(kind.canonical())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<CellErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CellErrorKind::from_literal(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error kind: {}", s)))
    }
}

/// Represents the calculated result or raw data within a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(#[serde(with = "error_kind_serde")] CellErrorKind),
}

impl CellValue {
    /// Text shown to a user or written back out as cell contents text,
    /// not to be confused with the raw formula/literal `contents` string.
    pub fn display_value(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Error(e) => e.canonical().to_string(),
        }
    }
}

/// The atomic unit of the spreadsheet: its location, the raw contents
/// string the user entered (`None` for an absent/empty cell), the parsed
/// AST when `contents` is a formula, the last computed value, and the set
/// of cells it directly depends on (mirrored into the workbook's
/// dependency graph, and kept here so a cell's own direct dependencies can
/// be inspected without a graph lookup).
#[derive(Debug, Clone)]
pub struct Cell {
    pub location: CellCoord,
    pub contents: Option<String>,
    pub ast: Option<Expression>,
    pub value: CellValue,
    pub depends_on: HashSet<CellCoord>,
}

impl Cell {
    pub fn empty(location: CellCoord) -> Self {
        Cell {
            location,
            contents: None,
            ast: None,
            value: CellValue::Empty,
            depends_on: HashSet::new(),
        }
    }

    pub fn literal(location: CellCoord, contents: String, value: CellValue) -> Self {
        Cell {
            location,
            contents: Some(contents),
            ast: None,
            value,
            depends_on: HashSet::new(),
        }
    }

    pub fn formula(location: CellCoord, contents: String, ast: Expression) -> Self {
        Cell {
            location,
            contents: Some(contents),
            ast: Some(ast),
            value: CellValue::Empty,
            depends_on: HashSet::new(),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.ast.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::SheetId;

    fn loc() -> CellCoord {
        CellCoord::new(SheetId(0), 1, 1)
    }

    #[test]
    fn display_value_formats_whole_numbers_without_decimals() {
        assert_eq!(CellValue::Number(42.0).display_value(), "42");
        assert_eq!(CellValue::Number(1.5).display_value(), "1.5");
    }

    #[test]
    fn display_value_renders_errors_canonically() {
        assert_eq!(
            CellValue::Error(CellErrorKind::DivZero).display_value(),
            "#DIV/0!"
        );
    }

    #[test]
    fn error_kind_serde_roundtrips_through_json() {
        let value = CellValue::Error(CellErrorKind::BadRef);
        let json = serde_json::to_string(&value).unwrap();
        let back: CellValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn empty_cell_has_no_contents_or_ast() {
        let cell = Cell::empty(loc());
        assert!(cell.contents.is_none());
        assert!(cell.ast.is_none());
        assert!(!cell.is_formula());
    }
}
