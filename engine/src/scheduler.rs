//! FILENAME: engine/src/scheduler.rs
//! PURPOSE: The update scheduler: applies a batch of cell-content edits as
//! one atomic recalculation pass.
//!
//! ALGORITHM (per edit batch):
//! 1. Parse each new contents string and store it, evaluating formula
//!    cells once immediately to learn their (lazy-aware) direct
//!    dependencies and wire them into the graph.
//! 2. Compute `affected`: every edited cell plus everything transitively
//!    reachable from it through the dependent graph.
//! 3. Partition `affected` into strongly connected components.
//! 4. Any component of size > 1, or a singleton with a self-loop, is a
//!    circular reference: every member is set to CIRCREF directly, no
//!    evaluation.
//! 5. The remaining (acyclic) cells are topologically sorted...
//! 6. ...and evaluated in that order, so every formula sees its
//!    precedents' final values for this batch.
//! 7. The final change-set is every affected cell whose value differs from
//!    its value before the batch, de-duplicated and ordered by when it was
//!    first touched.
//! 8. Registered callbacks are invoked with that change-set.

use std::collections::{HashMap, HashSet};

use crate::cell::CellValue;
use crate::coord::CellCoord;
use parser::CellErrorKind;

use crate::workbook::{parse_cell_contents, recompute, Workbook};

pub fn apply_changes(workbook: &mut Workbook, batch: Vec<(CellCoord, String)>) -> Vec<CellCoord> {
    let mut before: HashMap<CellCoord, CellValue> = HashMap::new();
    let mut touch_order: Vec<CellCoord> = Vec::new();

    for (coord, _) in &batch {
        before.entry(*coord).or_insert_with(|| current_value(workbook, *coord));
        touch_order.push(*coord);
    }

    // Step 1: store new contents, learn direct dependencies for formulas.
    for (coord, contents) in batch {
        let cell = parse_cell_contents(coord, &contents);
        let is_formula = cell.is_formula();
        if let Some(sheet) = workbook.sheet_mut(coord.sheet) {
            sheet.set_cell(coord.col, coord.row, cell);
        }
        if is_formula {
            recompute(workbook, coord);
        } else {
            workbook.graph.replace_outgoing_edges(coord, HashSet::new());
        }
    }

    // Step 2: affected = changed cells + everything reachable from them.
    let changed_set: HashSet<CellCoord> = touch_order.iter().copied().collect();
    let affected = workbook.graph.reachable_from_set(&changed_set);

    for &coord in &affected {
        before.entry(coord).or_insert_with(|| current_value(workbook, coord));
    }

    // Step 3 + 4: strongly connected components, circular members marked.
    let sccs = workbook.graph.strongly_connected_components(&affected);
    let mut acyclic: HashSet<CellCoord> = HashSet::new();
    let mut topo_touch_order: Vec<CellCoord> = Vec::new();

    for scc in sccs {
        let is_cycle = scc.len() > 1
            || scc
                .first()
                .map(|&n| workbook.graph.get_precedents(n).map_or(false, |p| p.contains(&n)))
                .unwrap_or(false);

        if is_cycle {
            for coord in scc {
                set_circref(workbook, coord);
                topo_touch_order.push(coord);
            }
        } else {
            acyclic.extend(scc);
        }
    }

    // Step 5 + 6: topological evaluation of the acyclic remainder.
    let order = workbook.graph.topological_sort_of(&acyclic);
    for coord in order {
        recompute(workbook, coord);
        topo_touch_order.push(coord);
    }

    // Step 7: de-duplicated change-set, first-touched order preserved.
    let mut seen: HashSet<CellCoord> = HashSet::new();
    let mut changes = Vec::new();
    for coord in touch_order.into_iter().chain(topo_touch_order) {
        if !seen.insert(coord) {
            continue;
        }
        let before_value = before.get(&coord).cloned().unwrap_or(CellValue::Empty);
        let after_value = current_value(workbook, coord);
        if before_value != after_value {
            changes.push(coord);
        }
    }

    changes
}

fn current_value(workbook: &Workbook, coord: CellCoord) -> CellValue {
    workbook.get_cell_value(coord).unwrap_or(CellValue::Empty)
}

fn set_circref(workbook: &mut Workbook, coord: CellCoord) {
    if let Some(sheet) = workbook.sheet_mut(coord.sheet) {
        if let Some(cell) = sheet.cell_mut(coord.col, coord.row) {
            cell.value = CellValue::Error(CellErrorKind::CircRef);
        }
    }
}
