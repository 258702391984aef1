//! FILENAME: engine/src/workbook.rs
//! PURPOSE: The engine facade: the single entry point embedding code uses to
//! create and rename sheets, read and write cell contents, move/copy/sort
//! regions, and register change callbacks. Every mutation is funneled
//! through the update scheduler so dependents always recalculate in a
//! consistent, cycle-aware order.

use std::collections::HashMap;

use parser::{CellErrorKind, Expression};

use crate::cell::{Cell, CellValue};
use crate::coord::{coord_to_a1, col_to_index, CellCoord, SheetId};
use crate::dependency_graph::DependencyGraph;
use crate::error::EngineError;
use crate::scheduler;
use crate::sheet::Sheet;

/// A callback invoked with the set of cells whose value changed as the
/// result of an edit. Callback panics are caught so one bad subscriber
/// can't prevent the others, or the edit itself, from completing.
pub type ChangeCallback = Box<dyn Fn(&Workbook, &[CellCoord]) + 'static>;

pub struct Workbook {
    sheets: Vec<Option<Sheet>>,
    name_index: HashMap<String, SheetId>,
    pub(crate) graph: DependencyGraph,
    callbacks: Vec<ChangeCallback>,
}

impl Workbook {
    pub fn new() -> Self {
        Workbook {
            sheets: Vec::new(),
            name_index: HashMap::new(),
            graph: DependencyGraph::new(),
            callbacks: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Sheet management
    // ------------------------------------------------------------------

    pub fn create_sheet(&mut self, name: &str) -> Result<SheetId, EngineError> {
        validate_sheet_name(name)?;
        let key = name.to_uppercase();
        if self.name_index.contains_key(&key) {
            return Err(EngineError::DuplicateSheetName(name.to_string()));
        }
        let id = SheetId(self.sheets.len() as u32);
        self.sheets.push(Some(Sheet::new(id, name.to_string())));
        self.name_index.insert(key, id);
        Ok(id)
    }

    pub fn delete_sheet(&mut self, id: SheetId) -> Result<(), EngineError> {
        let sheet = self
            .sheets
            .get_mut(id.0 as usize)
            .and_then(|s| s.take())
            .ok_or_else(|| EngineError::SheetNotFound(format!("{:?}", id)))?;
        self.name_index.remove(&sheet.name.to_uppercase());
        Ok(())
    }

    pub fn rename_sheet(&mut self, id: SheetId, new_name: &str) -> Result<(), EngineError> {
        crate::bulk_ops::rename_sheet(self, id, new_name)
    }

    /// Updates the sheet-name bookkeeping (the sheet's own `name` field plus
    /// `name_index`) in place. Does not touch any formula text; callers that
    /// also need cross-sheet formula references updated go through
    /// `rename_sheet`, which calls this after rewriting those references.
    pub(crate) fn apply_sheet_rename(&mut self, id: SheetId, new_name: &str) -> Result<String, EngineError> {
        validate_sheet_name(new_name)?;
        let key = new_name.to_uppercase();
        if let Some(existing) = self.name_index.get(&key) {
            if *existing != id {
                return Err(EngineError::DuplicateSheetName(new_name.to_string()));
            }
        }
        let old_name = {
            let sheet = self.sheets.get_mut(id.0 as usize).and_then(|s| s.as_mut()).ok_or_else(|| {
                EngineError::SheetNotFound(format!("{:?}", id))
            })?;
            let old_name = sheet.name.clone();
            sheet.name = new_name.to_string();
            old_name
        };
        self.name_index.remove(&old_name.to_uppercase());
        self.name_index.insert(key, id);
        Ok(old_name)
    }

    /// All formula cells in the workbook, as `(coord, ast)` pairs. Used by
    /// bulk operations that need to scan every formula for references to
    /// rewrite, regardless of which sheet they live on.
    pub(crate) fn all_formula_cells(&self) -> Vec<(CellCoord, Expression)> {
        let mut out = Vec::new();
        for sheet in self.sheets.iter().flatten() {
            for (_, cell) in sheet.iter() {
                if let Some(ast) = &cell.ast {
                    out.push((cell.location, ast.clone()));
                }
            }
        }
        out
    }

    pub fn list_sheets(&self) -> Vec<(SheetId, &str)> {
        self.sheets
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| (s.id, s.name.as_str()))
            .collect()
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    pub(crate) fn sheet_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.get_mut(id.0 as usize).and_then(|s| s.as_mut())
    }

    pub fn resolve_sheet_name(&self, name: &str) -> Option<SheetId> {
        self.name_index.get(&name.to_uppercase()).copied()
    }

    // ------------------------------------------------------------------
    // Cell access
    // ------------------------------------------------------------------

    pub fn get_cell_contents(&self, coord: CellCoord) -> Option<String> {
        self.sheet(coord.sheet)?.get_cell(coord.col, coord.row)?.contents.clone()
    }

    pub fn get_cell_value(&self, coord: CellCoord) -> Option<CellValue> {
        self.sheet(coord.sheet)?.get_cell(coord.col, coord.row).map(|c| c.value.clone())
    }

    pub fn get_cell(&self, coord: CellCoord) -> Option<&Cell> {
        self.sheet(coord.sheet)?.get_cell(coord.col, coord.row)
    }

    /// Sets a single cell's contents, running the full recalculation batch
    /// for just this one change, and returns the set of cells whose value
    /// changed (including `coord` itself, if applicable).
    pub fn set_cell_contents(&mut self, sheet: SheetId, a1: &str, contents: String) -> Result<Vec<CellCoord>, EngineError> {
        let coord = parse_a1(sheet, a1)?;
        self.set_cell_contents_batch(vec![(coord, contents)])
    }

    /// Applies a batch of cell-content changes as a single recalculation
    /// pass: dependents are only recalculated once per batch, not once per
    /// individual change.
    pub fn set_cell_contents_batch(&mut self, batch: Vec<(CellCoord, String)>) -> Result<Vec<CellCoord>, EngineError> {
        for (coord, _) in &batch {
            if !coord.in_bounds() {
                return Err(EngineError::OutOfBounds(*coord));
            }
            if self.sheet(coord.sheet).is_none() {
                return Err(EngineError::SheetNotFound(format!("{:?}", coord.sheet)));
            }
        }
        let changed = scheduler::apply_changes(self, batch);
        self.notify(&changed);
        Ok(changed)
    }

    pub fn register_change_callback(&mut self, callback: ChangeCallback) {
        self.callbacks.push(callback);
    }

    fn notify(&self, changed: &[CellCoord]) {
        if changed.is_empty() {
            return;
        }
        for callback in &self.callbacks {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(self, changed)));
        }
    }

    // ------------------------------------------------------------------
    // Bulk operations (delegated to bulk_ops.rs)
    // ------------------------------------------------------------------

    pub fn move_cells(&mut self, source: (CellCoord, CellCoord), dest: CellCoord) -> Result<Vec<CellCoord>, EngineError> {
        let changed = crate::bulk_ops::move_cells(self, source, dest)?;
        self.notify(&changed);
        Ok(changed)
    }

    pub fn copy_cells(&mut self, source: (CellCoord, CellCoord), dest: CellCoord) -> Result<Vec<CellCoord>, EngineError> {
        let changed = crate::bulk_ops::copy_cells(self, source, dest)?;
        self.notify(&changed);
        Ok(changed)
    }

    pub fn sort_region(&mut self, region: (CellCoord, CellCoord), key_cols: &[u32], descending: &[bool]) -> Result<Vec<CellCoord>, EngineError> {
        let changed = crate::bulk_ops::sort_region(self, region, key_cols, descending)?;
        self.notify(&changed);
        Ok(changed)
    }

    pub fn copy_sheet(&mut self, source: SheetId, new_name: &str) -> Result<SheetId, EngineError> {
        crate::bulk_ops::copy_sheet(self, source, new_name)
    }

    // ------------------------------------------------------------------
    // Test conveniences: A1-addressed reads, used throughout this crate's
    // own test suites so tests read the way a user would write a formula.
    // ------------------------------------------------------------------

    #[cfg(test)]
    pub fn get_cell_value_at(&self, sheet: SheetId, a1: &str) -> CellValue {
        let coord = parse_a1(sheet, a1).expect("valid A1 address in test");
        self.get_cell_value(coord).unwrap_or(CellValue::Empty)
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejects sheet names that can never be referenced: empty, or containing a
/// single quote (a quoted sheet-name reference has no escape for an embedded
/// quote, so such a name could never be named from a formula again).
fn validate_sheet_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() || name.contains('\'') {
        return Err(EngineError::InvalidSheetName(name.to_string()));
    }
    Ok(())
}

/// Parses a bare (unqualified, non-absolute) A1 address like "B12" into a
/// `CellCoord` on `sheet`. Used by the convenience, string-addressed entry
/// points and by the persistence crate's loader; callers working with
/// cross-sheet or absolute references go through the parser crate directly.
pub fn parse_a1(sheet: SheetId, a1: &str) -> Result<CellCoord, EngineError> {
    let split_at = a1.find(|c: char| c.is_ascii_digit()).ok_or_else(|| EngineError::InvalidFormula {
        coord: CellCoord::new(sheet, 0, 0),
        message: format!("not a cell address: {}", a1),
    })?;
    let (letters, digits) = a1.split_at(split_at);
    let row: u32 = digits.parse().map_err(|_| EngineError::InvalidFormula {
        coord: CellCoord::new(sheet, 0, 0),
        message: format!("not a cell address: {}", a1),
    })?;
    Ok(CellCoord::new(sheet, col_to_index(letters), row))
}

/// Renders a coordinate's cell portion back to A1 text, ignoring its sheet.
pub fn coord_to_a1_text(coord: CellCoord) -> String {
    coord_to_a1(coord.col, coord.row)
}

/// Parses raw cell-contents text into a `Cell`. A leading `=` makes it a
/// formula (parsed into an AST, value filled in later by the evaluator); a
/// number, `TRUE`/`FALSE`, or an error literal like `#REF!` is parsed as
/// that literal type; everything else, including the empty string, becomes
/// text or the absent cell.
pub(crate) fn parse_cell_contents(location: CellCoord, text: &str) -> Cell {
    if text.is_empty() {
        return Cell::empty(location);
    }
    if let Some(formula_text) = text.strip_prefix('=') {
        return match parser::parse(formula_text) {
            Ok(ast) => Cell::formula(location, text.to_string(), ast),
            Err(_) => Cell::literal(location, text.to_string(), CellValue::Error(CellErrorKind::Parse)),
        };
    }
    let value = if let Ok(n) = text.parse::<f64>() {
        CellValue::Number(n)
    } else if text.eq_ignore_ascii_case("true") {
        CellValue::Boolean(true)
    } else if text.eq_ignore_ascii_case("false") {
        CellValue::Boolean(false)
    } else if let Some(kind) = CellErrorKind::from_literal(text) {
        CellValue::Error(kind)
    } else {
        CellValue::Text(text.to_string())
    };
    Cell::literal(location, text.to_string(), value)
}

/// Re-evaluates a formula cell in place: runs the evaluator, stores the
/// resulting value, records the direct dependency set both on the cell
/// itself and in the dependency graph. No-op for non-formula cells (their
/// edges are cleared directly wherever their contents are set).
pub(crate) fn recompute(workbook: &mut Workbook, coord: CellCoord) {
    let ast = match workbook.get_cell(coord) {
        Some(cell) => match &cell.ast {
            Some(ast) => ast.clone(),
            None => return,
        },
        None => return,
    };

    let evaluator = crate::evaluator::Evaluator::new(workbook, coord.sheet);
    let (result, deps) = evaluator.run(&ast);
    let value = result.to_cell_value();

    workbook.graph.replace_outgoing_edges(coord, deps.clone());
    if let Some(sheet) = workbook.sheet_mut(coord.sheet) {
        if let Some(cell) = sheet_cell_mut(sheet, coord) {
            cell.value = value;
            cell.depends_on = deps;
        }
    }
}

fn sheet_cell_mut(sheet: &mut Sheet, coord: CellCoord) -> Option<&mut Cell> {
    sheet.cell_mut(coord.col, coord.row)
}
