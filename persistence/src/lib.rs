//! FILENAME: persistence/src/lib.rs
//! PURPOSE: Saves and loads a workbook as the JSON document format: a list
//! of sheets, each carrying its name and a map from A1 address to the raw
//! contents string of every non-empty cell. Contents are stored exactly as
//! entered (not the evaluated value), so loading re-derives every computed
//! value through the ordinary scheduler path rather than trusting a
//! snapshot of stale results.

mod error;

pub use error::PersistenceError;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use engine::{coord_to_a1_text, parse_a1, CellCoord, Workbook};

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    sheets: Vec<SheetDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SheetDocument {
    name: String,
    #[serde(rename = "cell-contents")]
    cell_contents: BTreeMap<String, String>,
}

/// Serializes `workbook` as the JSON document format and writes it to
/// `writer`. Only non-empty cells are stored; sheet order matches
/// `workbook.list_sheets()`.
pub fn save_to_writer<W: Write>(workbook: &Workbook, writer: W) -> Result<(), PersistenceError> {
    let sheets = workbook
        .list_sheets()
        .into_iter()
        .map(|(id, name)| {
            let sheet = workbook.sheet(id).expect("sheet id from list_sheets always resolves");
            let cell_contents = sheet
                .iter()
                .filter_map(|(&(col, row), cell)| {
                    cell.contents.clone().map(|contents| (coord_to_a1_text(CellCoord::new(id, col, row)), contents))
                })
                .collect();
            SheetDocument { name: name.to_string(), cell_contents }
        })
        .collect();

    serde_json::to_writer_pretty(writer, &Document { sheets })?;
    Ok(())
}

pub fn save_to_string(workbook: &Workbook) -> Result<String, PersistenceError> {
    let mut buf = Vec::new();
    save_to_writer(workbook, &mut buf)?;
    Ok(String::from_utf8(buf).expect("serde_json always writes valid UTF-8"))
}

/// Parses the JSON document format from `reader` into a fresh `Workbook`.
/// Sheets are created in the listed order; each sheet's cells are applied
/// as a single batch, so recalculation happens once per sheet rather than
/// once per cell. A malformed address, a duplicate sheet name, or
/// malformed JSON structure fails the whole load; partial state from a
/// failed load is discarded by the caller (this function only ever hands
/// back a `Workbook` on success).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Workbook, PersistenceError> {
    let document: Document = serde_json::from_reader(reader)?;
    build_workbook(document)
}

pub fn load_from_str(json: &str) -> Result<Workbook, PersistenceError> {
    let document: Document = serde_json::from_str(json)?;
    build_workbook(document)
}

fn build_workbook(document: Document) -> Result<Workbook, PersistenceError> {
    let mut workbook = Workbook::new();

    for sheet_doc in document.sheets {
        let sheet_id = workbook
            .create_sheet(&sheet_doc.name)
            .map_err(|_| PersistenceError::DuplicateSheetName(sheet_doc.name.clone()))?;

        let mut batch = Vec::with_capacity(sheet_doc.cell_contents.len());
        for (address, contents) in sheet_doc.cell_contents {
            let coord = parse_a1(sheet_id, &address)
                .map_err(|_| PersistenceError::MalformedCellAddress(address.clone(), sheet_doc.name.clone()))?;
            batch.push((coord, contents));
        }
        workbook.set_cell_contents_batch(batch)?;
    }

    Ok(workbook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::CellValue;

    #[test]
    fn save_then_load_round_trips_formulas_and_values() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        wb.set_cell_contents(sid, "A1", "10".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "=A1*2".to_string()).unwrap();

        let json = save_to_string(&wb).unwrap();
        let loaded = load_from_str(&json).unwrap();

        let loaded_id = loaded.resolve_sheet_name("Sheet1").unwrap();
        let a2 = parse_a1(loaded_id, "A2").unwrap();
        assert_eq!(loaded.get_cell_value(a2).unwrap(), CellValue::Number(20.0));
    }

    #[test]
    fn empty_cells_are_not_stored() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        wb.set_cell_contents(sid, "A1", "hello".to_string()).unwrap();
        wb.set_cell_contents(sid, "B1", String::new()).unwrap();

        let json = save_to_string(&wb).unwrap();
        assert!(json.contains("A1"));
        assert!(!json.contains("B1"));
    }

    #[test]
    fn duplicate_sheet_names_fail_the_load() {
        let json = r#"{"sheets": [{"name": "Sheet1", "cell-contents": {}}, {"name": "Sheet1", "cell-contents": {}}]}"#;
        assert!(load_from_str(json).is_err());
    }

    #[test]
    fn malformed_cell_address_fails_the_load() {
        let json = r#"{"sheets": [{"name": "Sheet1", "cell-contents": {"NotACell": "1"}}]}"#;
        assert!(load_from_str(json).is_err());
    }

    #[test]
    fn loading_preserves_cross_sheet_formula_evaluation() {
        let mut wb = Workbook::new();
        let inputs = wb.create_sheet("Inputs").unwrap();
        let summary = wb.create_sheet("Summary").unwrap();
        wb.set_cell_contents(inputs, "A1", "7".to_string()).unwrap();
        wb.set_cell_contents(summary, "A1", "=Inputs!A1+1".to_string()).unwrap();

        let json = save_to_string(&wb).unwrap();
        let loaded = load_from_str(&json).unwrap();
        let summary_id = loaded.resolve_sheet_name("Summary").unwrap();
        let a1 = parse_a1(summary_id, "A1").unwrap();
        assert_eq!(loaded.get_cell_value(a1).unwrap(), CellValue::Number(8.0));
    }
}
