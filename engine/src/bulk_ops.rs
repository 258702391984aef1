//! FILENAME: engine/src/bulk_ops.rs
//! PURPOSE: Bulk operations that touch many cells at once: renaming a sheet
//! (rewriting every formula that names it), moving or copying a rectangular
//! region (shifting relative references), and sorting rows within a region
//! by one or more key columns. Each of these commits as a single scheduler
//! batch, so dependents recalculate once per operation rather than once per
//! cell touched.

use std::cmp::Ordering;

use crate::cell::CellValue;
use crate::coord::CellCoord;
use crate::error::EngineError;
use crate::evaluator::{compare_results, eval_result_from_cell_value};
use crate::reference::{rewrite_sheet_name, shift_references, unparse};
use crate::workbook::Workbook;

/// Renames a sheet and rewrites every formula in the workbook (on any
/// sheet) that names it, so `Sheet1!A1` becomes `Renamed!A1` rather than
/// silently dangling. Non-formula cells are untouched.
pub fn rename_sheet(workbook: &mut Workbook, id: crate::coord::SheetId, new_name: &str) -> Result<(), EngineError> {
    let old_name = workbook.apply_sheet_rename(id, new_name)?;

    let mut batch = Vec::new();
    for (coord, ast) in workbook.all_formula_cells() {
        let rewritten = rewrite_sheet_name(&ast, &old_name, new_name);
        if rewritten != ast {
            batch.push((coord, format!("={}", unparse(&rewritten))));
        }
    }
    if !batch.is_empty() {
        workbook.set_cell_contents_batch(batch)?;
    }
    Ok(())
}

/// Duplicates `source` as a new sheet named `new_name`, carrying every
/// cell's contents over verbatim at the same (col, row). Formula text is
/// not rewritten: an unqualified reference still means "this sheet",
/// which now means the copy, exactly as copying a sheet in a spreadsheet
/// application leaves same-sheet formulas referring to the new sheet while
/// any reference that explicitly names another sheet is unaffected.
pub fn copy_sheet(workbook: &mut Workbook, source: crate::coord::SheetId, new_name: &str) -> Result<crate::coord::SheetId, EngineError> {
    let contents: Vec<(u32, u32, String)> = {
        let sheet = workbook.sheet(source).ok_or_else(|| EngineError::SheetNotFound(format!("{:?}", source)))?;
        sheet.iter().filter_map(|(&(col, row), cell)| cell.contents.clone().map(|c| (col, row, c))).collect()
    };

    let new_id = workbook.create_sheet(new_name)?;
    let batch = contents.into_iter().map(|(col, row, text)| (CellCoord::new(new_id, col, row), text)).collect();
    workbook.set_cell_contents_batch(batch)?;
    Ok(new_id)
}

fn region_bounds(source: (CellCoord, CellCoord)) -> (CellCoord, CellCoord) {
    let (a, b) = source;
    let top_left = CellCoord::new(a.sheet, a.col.min(b.col), a.row.min(b.row));
    let bottom_right = CellCoord::new(a.sheet, a.col.max(b.col), a.row.max(b.row));
    (top_left, bottom_right)
}

/// Collects every cell's `(contents, is_formula)` within `[top_left,
/// bottom_right]` on a single sheet, skipping cells with no contents.
fn snapshot_region(workbook: &Workbook, top_left: CellCoord, bottom_right: CellCoord) -> Vec<(CellCoord, String)> {
    let mut out = Vec::new();
    for row in top_left.row..=bottom_right.row {
        for col in top_left.col..=bottom_right.col {
            let coord = CellCoord::new(top_left.sheet, col, row);
            if let Some(contents) = workbook.get_cell_contents(coord) {
                out.push((coord, contents));
            }
        }
    }
    out
}

/// Builds the batch of `(destination coord, new contents)` pairs for
/// copying/moving `source` to have its top-left land at `dest`, shifting
/// relative references in every formula cell by the same delta.
fn shifted_batch(
    workbook: &Workbook,
    source: (CellCoord, CellCoord),
    dest: CellCoord,
) -> Result<Vec<(CellCoord, String)>, EngineError> {
    if workbook.sheet(dest.sheet).is_none() {
        return Err(EngineError::SheetNotFound(format!("{:?}", dest.sheet)));
    }
    let (top_left, bottom_right) = region_bounds(source);
    let delta_col = dest.col as i64 - top_left.col as i64;
    let delta_row = dest.row as i64 - top_left.row as i64;

    let mut batch = Vec::new();
    for (coord, contents) in snapshot_region(workbook, top_left, bottom_right) {
        let new_coord = CellCoord::new(
            dest.sheet,
            (coord.col as i64 + delta_col) as u32,
            (coord.row as i64 + delta_row) as u32,
        );
        if !new_coord.in_bounds() {
            return Err(EngineError::OutOfBounds(new_coord));
        }
        let new_contents = match contents.strip_prefix('=') {
            Some(formula_text) => match parser::parse(formula_text) {
                Ok(ast) => format!("={}", unparse(&shift_references(&ast, delta_col, delta_row))),
                Err(_) => contents,
            },
            None => contents,
        };
        batch.push((new_coord, new_contents));
    }
    Ok(batch)
}

/// Copies `source` to `dest`, leaving the source region untouched.
pub fn copy_cells(workbook: &mut Workbook, source: (CellCoord, CellCoord), dest: CellCoord) -> Result<Vec<CellCoord>, EngineError> {
    let batch = shifted_batch(workbook, source, dest)?;
    workbook.set_cell_contents_batch(batch)
}

/// Moves `source` to `dest`: copies with reference shifting, then clears
/// every source cell that falls outside the destination region (a move
/// onto an overlapping region leaves the overlap as the moved contents).
pub fn move_cells(workbook: &mut Workbook, source: (CellCoord, CellCoord), dest: CellCoord) -> Result<Vec<CellCoord>, EngineError> {
    let batch = shifted_batch(workbook, source, dest)?;
    let (top_left, bottom_right) = region_bounds(source);
    let width = bottom_right.col - top_left.col;
    let height = bottom_right.row - top_left.row;
    let dest_bottom_right = CellCoord::new(dest.sheet, dest.col + width, dest.row + height);

    let mut clears = Vec::new();
    for row in top_left.row..=bottom_right.row {
        for col in top_left.col..=bottom_right.col {
            let coord = CellCoord::new(top_left.sheet, col, row);
            let inside_dest = coord.sheet == dest.sheet
                && coord.col >= dest.col
                && coord.col <= dest_bottom_right.col
                && coord.row >= dest.row
                && coord.row <= dest_bottom_right.row;
            if !inside_dest && workbook.get_cell_contents(coord).is_some() {
                clears.push((coord, String::new()));
            }
        }
    }

    let mut all = batch;
    all.extend(clears);
    workbook.set_cell_contents_batch(all)
}

/// Sorts the rows of `region` by `key_cols` (1-based column indices
/// relative to the workbook, not the region), stably, applying `descending`
/// per key column (shorter than `key_cols` means later keys default to
/// ascending). Each row's formulas are rewritten with every relative
/// reference shifted vertically by that row's own (new_row - old_row)
/// displacement, the same way a copy would shift them — a reference inside
/// the sorted row follows it to its new position, and a reference to a row
/// outside the block shifts by that same amount since it's still reached
/// relative to the row holding the formula. Cell content *outside* the
/// sorted rows is never rewritten: an external formula naming a row by its
/// absolute position keeps naming that position, now holding whichever row
/// the sort put there.
pub fn sort_region(
    workbook: &mut Workbook,
    region: (CellCoord, CellCoord),
    key_cols: &[u32],
    descending: &[bool],
) -> Result<Vec<CellCoord>, EngineError> {
    let (top_left, bottom_right) = region_bounds(region);

    let mut rows: Vec<u32> = (top_left.row..=bottom_right.row).collect();
    let sort_key = |workbook: &Workbook, row: u32| -> Vec<CellValue> {
        key_cols
            .iter()
            .map(|&col| {
                let coord = CellCoord::new(top_left.sheet, col, row);
                workbook.get_cell_value(coord).unwrap_or(CellValue::Empty)
            })
            .collect()
    };

    let mut keyed: Vec<(u32, Vec<CellValue>)> = rows.drain(..).map(|r| (r, sort_key(workbook, r))).collect();
    keyed.sort_by(|(_, a), (_, b)| {
        for (i, (av, bv)) in a.iter().zip(b.iter()).enumerate() {
            let rank = compare_results(&eval_result_from_cell_value(av), &eval_result_from_cell_value(bv));
            if rank != Ordering::Equal {
                let reverse = descending.get(i).copied().unwrap_or(false);
                return if reverse { rank.reverse() } else { rank };
            }
        }
        Ordering::Equal
    });

    let new_row_of: Vec<(u32, u32)> = keyed
        .iter()
        .enumerate()
        .map(|(i, (old_row, _))| (*old_row, top_left.row + i as u32))
        .collect();

    let mut batch = Vec::new();
    for &(old_row, new_row) in &new_row_of {
        if old_row == new_row {
            continue;
        }
        let delta_row = new_row as i64 - old_row as i64;
        for col in top_left.col..=bottom_right.col {
            let old_coord = CellCoord::new(top_left.sheet, col, old_row);
            let new_coord = CellCoord::new(top_left.sheet, col, new_row);
            let contents = workbook.get_cell_contents(old_coord).unwrap_or_default();
            let new_contents = match contents.strip_prefix('=') {
                Some(formula_text) => match parser::parse(formula_text) {
                    Ok(ast) => format!("={}", unparse(&shift_references(&ast, 0, delta_row))),
                    Err(_) => contents,
                },
                None => contents,
            };
            batch.push((new_coord, new_contents));
        }
    }
    workbook.set_cell_contents_batch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::SheetId;

    fn wb_with_sheet() -> (Workbook, SheetId) {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        (wb, sid)
    }

    #[test]
    fn rename_sheet_rewrites_cross_sheet_formula_references() {
        let mut wb = Workbook::new();
        let s1 = wb.create_sheet("Sheet1").unwrap();
        let s2 = wb.create_sheet("Sheet2").unwrap();
        wb.set_cell_contents(s1, "A1", "5".to_string()).unwrap();
        wb.set_cell_contents(s2, "A1", "=Sheet1!A1+1".to_string()).unwrap();

        wb.rename_sheet(s1, "Renamed").unwrap();

        assert_eq!(wb.get_cell_contents(CellCoord::new(s2, 1, 1)).unwrap(), "=(Renamed!A1+1)");
        assert_eq!(wb.get_cell_value_at(s2, "A1"), CellValue::Number(6.0));
    }

    #[test]
    fn copy_shifts_relative_references() {
        let (mut wb, sid) = wb_with_sheet();
        wb.set_cell_contents(sid, "A1", "10".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "=A1*2".to_string()).unwrap();

        let source = (CellCoord::new(sid, 1, 2), CellCoord::new(sid, 1, 2));
        wb.copy_cells(source, CellCoord::new(sid, 2, 2)).unwrap();

        assert_eq!(wb.get_cell_contents(CellCoord::new(sid, 2, 2)).unwrap(), "=(B1*2)");
    }

    #[test]
    fn move_clears_the_source_cell() {
        let (mut wb, sid) = wb_with_sheet();
        wb.set_cell_contents(sid, "A1", "hello".to_string()).unwrap();

        let source = (CellCoord::new(sid, 1, 1), CellCoord::new(sid, 1, 1));
        wb.move_cells(source, CellCoord::new(sid, 3, 3)).unwrap();

        assert!(wb.get_cell_contents(CellCoord::new(sid, 1, 1)).is_none());
        assert_eq!(wb.get_cell_contents(CellCoord::new(sid, 3, 3)).unwrap(), "hello");
    }

    #[test]
    fn copy_sheet_duplicates_contents_under_a_new_name() {
        let (mut wb, sid) = wb_with_sheet();
        wb.set_cell_contents(sid, "A1", "5".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "=A1*2".to_string()).unwrap();

        let copy_id = wb.copy_sheet(sid, "Sheet1 Copy").unwrap();

        assert_eq!(wb.get_cell_value_at(copy_id, "A1"), CellValue::Number(5.0));
        assert_eq!(wb.get_cell_value_at(copy_id, "A2"), CellValue::Number(10.0));
        // The original is untouched.
        assert_eq!(wb.get_cell_value_at(sid, "A2"), CellValue::Number(10.0));
    }

    #[test]
    fn sort_region_orders_rows_by_key_column() {
        let (mut wb, sid) = wb_with_sheet();
        wb.set_cell_contents(sid, "A1", "3".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "1".to_string()).unwrap();
        wb.set_cell_contents(sid, "A3", "2".to_string()).unwrap();

        let region = (CellCoord::new(sid, 1, 1), CellCoord::new(sid, 1, 3));
        wb.sort_region(region, &[1], &[false]).unwrap();

        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Number(1.0));
        assert_eq!(wb.get_cell_value_at(sid, "A2"), CellValue::Number(2.0));
        assert_eq!(wb.get_cell_value_at(sid, "A3"), CellValue::Number(3.0));
    }

    #[test]
    fn sort_region_shifts_relative_references_in_moved_formulas() {
        let (mut wb, sid) = wb_with_sheet();
        // Key column A; column B carries a formula referencing the row above
        // it. Sorting must shift that reference along with the row it lands
        // on, not carry the formula text over byte-for-byte.
        wb.set_cell_contents(sid, "A1", "3".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "1".to_string()).unwrap();
        wb.set_cell_contents(sid, "A3", "2".to_string()).unwrap();
        wb.set_cell_contents(sid, "D1", "10".to_string()).unwrap();
        wb.set_cell_contents(sid, "D2", "20".to_string()).unwrap();
        wb.set_cell_contents(sid, "D3", "30".to_string()).unwrap();
        wb.set_cell_contents(sid, "B1", "=D1".to_string()).unwrap();
        wb.set_cell_contents(sid, "B2", "=D2".to_string()).unwrap();
        wb.set_cell_contents(sid, "B3", "=D3".to_string()).unwrap();

        let region = (CellCoord::new(sid, 1, 1), CellCoord::new(sid, 2, 3));
        wb.sort_region(region, &[1], &[false]).unwrap();

        // Row order becomes A2, A3, A1 (values 1, 2, 3); each row's B formula
        // must still point at the D cell it originally sat beside.
        assert_eq!(wb.get_cell_contents(CellCoord::new(sid, 2, 1)).unwrap(), "=D2");
        assert_eq!(wb.get_cell_contents(CellCoord::new(sid, 2, 2)).unwrap(), "=D3");
        assert_eq!(wb.get_cell_contents(CellCoord::new(sid, 2, 3)).unwrap(), "=D1");
        assert_eq!(wb.get_cell_value_at(sid, "B1"), CellValue::Number(20.0));
        assert_eq!(wb.get_cell_value_at(sid, "B2"), CellValue::Number(30.0));
        assert_eq!(wb.get_cell_value_at(sid, "B3"), CellValue::Number(10.0));
    }
}
