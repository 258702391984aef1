//! FILENAME: parser/src/tests.rs
//! PURPOSE: Consolidated integration tests for the lexer + parser pipeline.

use crate::ast::{BinaryOperator, BuiltinFunction, CellErrorKind, CellRefPart, Expression, UnaryOperator, Value};
use crate::parser::parse;

fn cell(col: u32, row: u32) -> CellRefPart {
    CellRefPart {
        col,
        row,
        col_absolute: false,
        row_absolute: false,
    }
}

#[test]
fn parses_number_literal() {
    assert_eq!(parse("42").unwrap(), Expression::Literal(Value::Number(42.0)));
}

#[test]
fn parses_negative_number_via_unary() {
    let expr = parse("-5").unwrap();
    assert_eq!(
        expr,
        Expression::UnaryOp {
            op: UnaryOperator::Negate,
            operand: Box::new(Expression::Literal(Value::Number(5.0))),
        }
    );
}

#[test]
fn parses_string_and_boolean_literals() {
    assert_eq!(
        parse("\"hello\"").unwrap(),
        Expression::Literal(Value::String("hello".to_string()))
    );
    assert_eq!(parse("TRUE").unwrap(), Expression::Literal(Value::Boolean(true)));
    assert_eq!(parse("false").unwrap(), Expression::Literal(Value::Boolean(false)));
}

#[test]
fn parses_error_literals_case_insensitively() {
    assert_eq!(
        parse("#div/0!").unwrap(),
        Expression::Literal(Value::Error(CellErrorKind::DivZero))
    );
    assert_eq!(
        parse("#REF!").unwrap(),
        Expression::Literal(Value::Error(CellErrorKind::BadRef))
    );
    assert_eq!(
        parse("#NAME?").unwrap(),
        Expression::Literal(Value::Error(CellErrorKind::BadName))
    );
}

#[test]
fn unknown_error_literal_is_a_parse_error() {
    assert!(parse("#BOGUS!").is_err());
}

#[test]
fn respects_additive_multiplicative_precedence() {
    // 1 + 2 * 3 -> 1 + (2 * 3)
    let expr = parse("1+2*3").unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Add, right, .. } => match *right {
            Expression::BinaryOp { op: BinaryOperator::Multiply, .. } => {}
            other => panic!("expected multiply on the right, got {:?}", other),
        },
        other => panic!("expected an Add node at the top, got {:?}", other),
    }
}

#[test]
fn operators_are_left_associative() {
    // 10 - 2 - 3 -> (10 - 2) - 3
    let expr = parse("10-2-3").unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Subtract, left, .. } => match *left {
            Expression::BinaryOp { op: BinaryOperator::Subtract, .. } => {}
            other => panic!("expected nested subtract on the left, got {:?}", other),
        },
        other => panic!("expected a Subtract node at the top, got {:?}", other),
    }
}

#[test]
fn concatenation_sits_between_comparison_and_additive() {
    // "a" & 1 = "a1" should parse as ("a" & 1) = "a1", not "a" & (1 = "a1")
    let expr = parse("\"a\"&1=\"a1\"").unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Equal, left, .. } => match *left {
            Expression::BinaryOp { op: BinaryOperator::Concat, .. } => {}
            other => panic!("expected concat nested under equal, got {:?}", other),
        },
        other => panic!("expected Equal at the top, got {:?}", other),
    }
}

#[test]
fn double_equals_and_bang_equals_are_aliases() {
    assert_eq!(
        parse("1==1").unwrap(),
        Expression::BinaryOp {
            left: Box::new(Expression::Literal(Value::Number(1.0))),
            op: BinaryOperator::Equal,
            right: Box::new(Expression::Literal(Value::Number(1.0))),
        }
    );
    assert_eq!(
        parse("1!=2").unwrap(),
        Expression::BinaryOp {
            left: Box::new(Expression::Literal(Value::Number(1.0))),
            op: BinaryOperator::NotEqual,
            right: Box::new(Expression::Literal(Value::Number(2.0))),
        }
    );
}

#[test]
fn parses_plain_cell_reference() {
    assert_eq!(
        parse("A1").unwrap(),
        Expression::CellRef {
            sheet: None,
            reference: cell(1, 1),
        }
    );
    assert_eq!(
        parse("AA100").unwrap(),
        Expression::CellRef {
            sheet: None,
            reference: cell(27, 100),
        }
    );
}

#[test]
fn parses_all_four_absolute_combinations() {
    assert_eq!(
        parse("$A1").unwrap(),
        Expression::CellRef {
            sheet: None,
            reference: CellRefPart { col: 1, row: 1, col_absolute: true, row_absolute: false },
        }
    );
    assert_eq!(
        parse("A$1").unwrap(),
        Expression::CellRef {
            sheet: None,
            reference: CellRefPart { col: 1, row: 1, col_absolute: false, row_absolute: true },
        }
    );
    assert_eq!(
        parse("$A$1").unwrap(),
        Expression::CellRef {
            sheet: None,
            reference: CellRefPart { col: 1, row: 1, col_absolute: true, row_absolute: true },
        }
    );
}

#[test]
fn parses_sheet_qualified_reference_unquoted() {
    assert_eq!(
        parse("Sheet1!A1").unwrap(),
        Expression::CellRef {
            sheet: Some("SHEET1".to_string()),
            reference: cell(1, 1),
        }
    );
}

#[test]
fn parses_sheet_qualified_reference_quoted() {
    assert_eq!(
        parse("'My Sheet'!B2").unwrap(),
        Expression::CellRef {
            sheet: Some("My Sheet".to_string()),
            reference: cell(2, 2),
        }
    );
}

#[test]
fn parses_range() {
    assert_eq!(
        parse("A1:B2").unwrap(),
        Expression::Range {
            sheet: None,
            start: cell(1, 1),
            end: cell(2, 2),
        }
    );
}

#[test]
fn parses_sheet_qualified_range() {
    assert_eq!(
        parse("Sheet1!A1:B2").unwrap(),
        Expression::Range {
            sheet: Some("SHEET1".to_string()),
            start: cell(1, 1),
            end: cell(2, 2),
        }
    );
}

#[test]
fn parses_function_call_resolving_builtin_at_parse_time() {
    let expr = parse("SUM(A1:A10, 5)").unwrap();
    match expr {
        Expression::FunctionCall { func, args } => {
            assert_eq!(func, BuiltinFunction::Sum);
            assert_eq!(args.len(), 2);
        }
        other => panic!("expected FunctionCall, got {:?}", other),
    }
}

#[test]
fn unrecognized_function_name_becomes_custom() {
    let expr = parse("FROBNICATE(1)").unwrap();
    match expr {
        Expression::FunctionCall { func, .. } => {
            assert_eq!(func, BuiltinFunction::Custom("FROBNICATE".to_string()));
        }
        other => panic!("expected FunctionCall, got {:?}", other),
    }
}

#[test]
fn parses_nested_parentheses() {
    let expr = parse("((1+2))*3").unwrap();
    match expr {
        Expression::BinaryOp { op: BinaryOperator::Multiply, .. } => {}
        other => panic!("expected Multiply at the top, got {:?}", other),
    }
}

#[test]
fn empty_expression_is_a_parse_error() {
    assert!(parse("").is_err());
}

#[test]
fn trailing_tokens_are_a_parse_error() {
    assert!(parse("1 1").is_err());
}

#[test]
fn illegal_character_is_a_parse_error() {
    assert!(parse("1 ~ 2").is_err());
}

#[test]
fn bare_column_only_identifier_is_a_parse_error() {
    // No named ranges or column-only references in this grammar.
    assert!(parse("ABC").is_err());
}
