//! FILENAME: engine/src/reference.rs
//! PURPOSE: The reference resolver: AST-level transforms used by bulk
//! operations — shifting relative references by a (column, row) delta for
//! move/copy, and rewriting a sheet name for sheet rename — without ever
//! touching formula text directly. Rewriting the AST and re-serializing it
//! (rather than string-substituting the formula text) is what lets a
//! sheet named "Q1" rename to "Q1 Summary" without corrupting an unrelated
//! "Q1Total" identifier elsewhere in the same formula.

use parser::{CellRefPart, Expression};

use crate::coord::{MAX_COL, MAX_ROW};

fn shift_part(part: &CellRefPart, delta_col: i64, delta_row: i64) -> Option<CellRefPart> {
    let col = if part.col_absolute { part.col as i64 } else { part.col as i64 + delta_col };
    let row = if part.row_absolute { part.row as i64 } else { part.row as i64 + delta_row };
    if col < 1 || col as u32 > MAX_COL || row < 1 || row as u32 > MAX_ROW {
        return None;
    }
    Some(CellRefPart {
        col: col as u32,
        row: row as u32,
        col_absolute: part.col_absolute,
        row_absolute: part.row_absolute,
    })
}

/// Shifts every relative reference in `expr` by `(delta_col, delta_row)`.
/// Absolute column/row components are left untouched, matching how a
/// spreadsheet's copy/paste only drags relative parts along. A reference
/// that shifts outside the addressable grid is replaced in place with a
/// `#REF!` literal, the same way a real spreadsheet burns an out-of-range
/// shift into the formula text.
pub fn shift_references(expr: &Expression, delta_col: i64, delta_row: i64) -> Expression {
    match expr {
        Expression::Literal(_) => expr.clone(),
        Expression::CellRef { sheet, reference } => match shift_part(reference, delta_col, delta_row) {
            Some(reference) => Expression::CellRef { sheet: sheet.clone(), reference },
            None => bad_ref_literal(),
        },
        Expression::Range { sheet, start, end } => {
            match (shift_part(start, delta_col, delta_row), shift_part(end, delta_col, delta_row)) {
                (Some(start), Some(end)) => Expression::Range { sheet: sheet.clone(), start, end },
                _ => bad_ref_literal(),
            }
        }
        Expression::UnaryOp { op, operand } => Expression::UnaryOp {
            op: *op,
            operand: Box::new(shift_references(operand, delta_col, delta_row)),
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(shift_references(left, delta_col, delta_row)),
            op: *op,
            right: Box::new(shift_references(right, delta_col, delta_row)),
        },
        Expression::FunctionCall { func, args } => Expression::FunctionCall {
            func: func.clone(),
            args: args.iter().map(|a| shift_references(a, delta_col, delta_row)).collect(),
        },
    }
}

fn bad_ref_literal() -> Expression {
    Expression::Literal(parser::Value::Error(parser::CellErrorKind::BadRef))
}

/// Rewrites every sheet-qualified reference in `expr` whose sheet name
/// case-insensitively matches `old_name` to instead name `new_name`.
pub fn rewrite_sheet_name(expr: &Expression, old_name: &str, new_name: &str) -> Expression {
    let matches = |s: &Option<String>| s.as_deref().map(|n| n.eq_ignore_ascii_case(old_name)).unwrap_or(false);

    match expr {
        Expression::Literal(_) => expr.clone(),
        Expression::CellRef { sheet, reference } => Expression::CellRef {
            sheet: if matches(sheet) { Some(new_name.to_string()) } else { sheet.clone() },
            reference: reference.clone(),
        },
        Expression::Range { sheet, start, end } => Expression::Range {
            sheet: if matches(sheet) { Some(new_name.to_string()) } else { sheet.clone() },
            start: start.clone(),
            end: end.clone(),
        },
        Expression::UnaryOp { op, operand } => Expression::UnaryOp {
            op: *op,
            operand: Box::new(rewrite_sheet_name(operand, old_name, new_name)),
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(rewrite_sheet_name(left, old_name, new_name)),
            op: *op,
            right: Box::new(rewrite_sheet_name(right, old_name, new_name)),
        },
        Expression::FunctionCall { func, args } => Expression::FunctionCall {
            func: func.clone(),
            args: args.iter().map(|a| rewrite_sheet_name(a, old_name, new_name)).collect(),
        },
    }
}

/// Re-serializes an AST back to formula text (without a leading `=`), so a
/// rewritten AST can be stored back as a cell's `contents` string. This is
/// a small pretty-printer, not a round-trip-exact unparser: it always
/// parenthesizes operator children and always renders references in their
/// long form (absolute markers only where the AST actually carries them).
pub fn unparse(expr: &Expression) -> String {
    match expr {
        Expression::Literal(v) => unparse_value(v),
        Expression::CellRef { sheet, reference } => format!("{}{}", sheet_prefix(sheet), unparse_ref(reference)),
        Expression::Range { sheet, start, end } => {
            format!("{}{}:{}", sheet_prefix(sheet), unparse_ref(start), unparse_ref(end))
        }
        Expression::UnaryOp { op, operand } => format!("{}{}", op, unparse(operand)),
        Expression::BinaryOp { left, op, right } => format!("({}{}{})", unparse(left), op, unparse(right)),
        Expression::FunctionCall { func, args } => {
            let name = match func {
                parser::BuiltinFunction::Custom(name) => name.clone(),
                other => format!("{:?}", other).to_uppercase(),
            };
            let args_text: Vec<String> = args.iter().map(unparse).collect();
            format!("{}({})", name, args_text.join(","))
        }
    }
}

/// A sheet name needs single-quoting unless it matches the unquoted
/// identifier grammar `[A-Za-z_][A-Za-z0-9_]*`.
fn needs_quoting(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return true,
    }
    !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sheet_prefix(sheet: &Option<String>) -> String {
    match sheet {
        Some(name) if needs_quoting(name) => format!("'{}'!", name),
        Some(name) => format!("{}!", name),
        None => String::new(),
    }
}

fn unparse_ref(part: &CellRefPart) -> String {
    format!(
        "{}{}{}{}",
        if part.col_absolute { "$" } else { "" },
        crate::coord::index_to_col(part.col),
        if part.row_absolute { "$" } else { "" },
        part.row
    )
}

fn unparse_value(v: &parser::Value) -> String {
    match v {
        parser::Value::Number(n) => n.to_string(),
        parser::Value::String(s) => format!("\"{}\"", s),
        parser::Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        parser::Value::Error(e) => e.canonical().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::parse;

    #[test]
    fn shifting_a_relative_reference_moves_it() {
        let expr = parse("A1").unwrap();
        let shifted = shift_references(&expr, 1, 2);
        assert_eq!(shifted, parse("B3").unwrap());
    }

    #[test]
    fn shifting_an_absolute_reference_leaves_it_in_place() {
        let expr = parse("$A$1").unwrap();
        let shifted = shift_references(&expr, 5, 5);
        assert_eq!(shifted, parse("$A$1").unwrap());
    }

    #[test]
    fn shifting_past_the_left_edge_yields_a_bad_ref_literal() {
        let expr = parse("A1").unwrap();
        let shifted = shift_references(&expr, -5, 0);
        assert_eq!(shifted, bad_ref_literal());
    }

    #[test]
    fn rewriting_sheet_name_only_touches_matching_refs() {
        let expr = parse("Sheet1!A1 + Sheet2!A1").unwrap();
        let rewritten = rewrite_sheet_name(&expr, "SHEET1", "Renamed");
        assert_eq!(rewritten, parse("Renamed!A1 + Sheet2!A1").unwrap());
    }
}
