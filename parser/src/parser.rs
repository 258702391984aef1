//! FILENAME: parser/src/parser.rs
//! PURPOSE: Recursive-descent / precedence-climbing parser that converts a
//! stream of Tokens into an AST.
//! CONTEXT: This is the second stage of the parsing pipeline. It takes
//! tokens from the Lexer and builds an Expression tree that the evaluator
//! traverses.
//!
//! GRAMMAR:
//!   expression     --> comparison
//!   comparison     --> concatenation ( ("=" | "==" | "<>" | "!=" | "<" | ">" | "<=" | ">=") concatenation )*
//!   concatenation  --> additive ( "&" additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> unary ( ("*" | "/") unary )*
//!   unary          --> ("+" | "-") unary | primary
//!   primary        --> NUMBER | STRING | BOOLEAN | ERROR_LITERAL
//!                     | reference | function_call | "(" expression ")"
//!   reference      --> [sheet_prefix] cell_ref (":" cell_ref)?
//!   sheet_prefix   --> (IDENTIFIER | QUOTED_IDENTIFIER) "!"
//!   cell_ref       --> "$"? COLUMN "$"? ROW
//!   function_call  --> IDENTIFIER "(" arguments? ")"
//!   arguments      --> expression ("," expression)*
//!
//! Operator precedence and associativity are fixed by this grammar and
//! implemented with a precedence-climbing descent: each level calls the
//! next-tighter-binding level as its operand parser
//! (comparison -> concatenation -> additive -> multiplicative -> unary ->
//! primary), so precedence lives in the call chain itself rather than in a
//! separate table. No parser-generator crate is introduced; the grammar is
//! small and fixed enough that a hand-written descent is the more direct
//! fit, the same tradeoff a zero-dependency formula parser makes elsewhere
//! in this stack.

use crate::ast::{BinaryOperator, BuiltinFunction, CellErrorKind, CellRefPart, Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::token::Token;

/// Parser errors with descriptive messages.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// The Parser struct holds the lexer and current token state.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser from an input string (without the leading `=`;
    /// the formula/literal distinction is made by the caller). Automatically
    /// advances to the first token.
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();
        Parser {
            lexer,
            current_token,
        }
    }

    /// Parses the entire input as a single expression.
    pub fn parse(&mut self) -> ParseResult<Expression> {
        if self.current_token == Token::EOF {
            return Err(ParseError::new("Empty expression"));
        }

        let expr = self.parse_expression()?;

        if self.current_token != Token::EOF {
            return Err(ParseError::new(format!(
                "Unexpected token after expression: {:?}",
                self.current_token
            )));
        }

        Ok(expr)
    }

    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            )))
        }
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match &self.current_token {
                Token::Equals => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.advance();
            let right = self.parse_concatenation()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;

        while self.current_token == Token::Ampersand {
            self.advance();
            let right = self.parse_additive()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Concat,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.advance();
            let right = self.parse_multiplicative()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match &self.current_token {
                Token::Asterisk => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.advance();
            let right = self.parse_unary()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        match self.current_token {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::UnaryOp {
                    op: UnaryOperator::Negate,
                    operand: Box::new(operand),
                })
            }
            Token::Plus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::UnaryOp {
                    op: UnaryOperator::Plus,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Dollar => {
                self.advance();
                self.parse_absolute_start(None)
            }

            Token::Number(n) => {
                self.advance();
                Ok(Expression::Literal(Value::Number(n)))
            }

            Token::String(s) => {
                self.advance();
                Ok(Expression::Literal(Value::String(s)))
            }

            Token::Boolean(b) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(b)))
            }

            Token::ErrorLiteral(lit) => {
                self.advance();
                match CellErrorKind::from_literal(&lit) {
                    Some(kind) => Ok(Expression::Literal(Value::Error(kind))),
                    None => Err(ParseError::new(format!("Unknown error literal: {}", lit))),
                }
            }

            Token::QuotedIdentifier(sheet_name) => {
                self.advance();
                self.expect(Token::Exclamation)?;
                self.parse_sheet_reference(sheet_name)
            }

            Token::Identifier(name) => {
                self.advance();

                if self.current_token == Token::Exclamation {
                    self.advance();
                    return self.parse_sheet_reference(name);
                }

                if self.current_token == Token::LParen {
                    return self.parse_function_call(name);
                }

                self.parse_unqualified_reference(None, name, false)
            }

            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }

            Token::EOF => Err(ParseError::new("Unexpected end of expression")),

            Token::Illegal(ch) => Err(ParseError::new(format!("Illegal character: {}", ch))),

            token => Err(ParseError::new(format!("Unexpected token: {:?}", token))),
        }
    }

    /// Parses a reference after a leading '$' (not yet sheet-qualified).
    fn parse_absolute_start(&mut self, sheet: Option<String>) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Identifier(name) => {
                self.advance();
                self.parse_unqualified_reference(sheet, name, true)
            }
            _ => Err(ParseError::new(format!(
                "Expected column letters after '$', found {:?}",
                self.current_token
            ))),
        }
    }

    /// Parses a reference after a sheet prefix (SheetName!).
    fn parse_sheet_reference(&mut self, sheet_name: String) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Dollar => {
                self.advance();
                self.parse_absolute_start(Some(sheet_name))
            }
            Token::Identifier(name) => {
                self.advance();
                self.parse_unqualified_reference(Some(sheet_name), name, false)
            }
            _ => Err(ParseError::new(format!(
                "Expected cell reference after '!', found {:?}",
                self.current_token
            ))),
        }
    }

    /// Parses a cell reference or range given the first identifier (already
    /// consumed) and whether its column part carried a leading '$'.
    fn parse_unqualified_reference(
        &mut self,
        sheet: Option<String>,
        first: String,
        first_col_absolute: bool,
    ) -> ParseResult<Expression> {
        let start = self.parse_ref_part(first, first_col_absolute)?;

        if self.current_token == Token::Colon {
            self.advance();

            let end_col_absolute = if self.current_token == Token::Dollar {
                self.advance();
                true
            } else {
                false
            };

            let end_ident = match self.current_token.clone() {
                Token::Identifier(name) => {
                    self.advance();
                    name
                }
                _ => {
                    return Err(ParseError::new(format!(
                        "Expected cell reference after ':', found {:?}",
                        self.current_token
                    )))
                }
            };

            let end = self.parse_ref_part(end_ident, end_col_absolute)?;

            return Ok(Expression::Range { sheet, start, end });
        }

        Ok(Expression::CellRef {
            sheet,
            reference: start,
        })
    }

    /// Parses one cell-reference "part" from an identifier already consumed
    /// by the lexer. If the identifier carries both letters and digits
    /// (e.g. "A1"), it is a complete reference. If it is letters-only (the
    /// lexer stopped at a '$' before the row digits, e.g. "A$1"), the
    /// absolute-row marker and row number are consumed here.
    fn parse_ref_part(&mut self, ident: String, col_absolute: bool) -> ParseResult<CellRefPart> {
        let has_digit = ident.chars().any(|c| c.is_ascii_digit());

        if has_digit {
            let (col_letters, row) = split_cell_reference(&ident)?;
            Ok(CellRefPart {
                col: col_letters_to_number(&col_letters),
                row,
                col_absolute,
                row_absolute: false,
            })
        } else if self.current_token == Token::Dollar {
            self.advance();
            match self.current_token.clone() {
                Token::Number(n) => {
                    self.advance();
                    let row = n as u32;
                    if row == 0 {
                        return Err(ParseError::new("Row number must be >= 1"));
                    }
                    Ok(CellRefPart {
                        col: col_letters_to_number(&ident),
                        row,
                        col_absolute,
                        row_absolute: true,
                    })
                }
                _ => Err(ParseError::new(format!(
                    "Expected row number after '$', found {:?}",
                    self.current_token
                ))),
            }
        } else {
            Err(ParseError::new(format!(
                "Invalid cell reference: {}",
                ident
            )))
        }
    }

    /// Parses a function call like SUM(A1, A2, 10).
    /// Resolves the function name to a BuiltinFunction enum at parse time,
    /// so evaluation never needs string dispatch.
    fn parse_function_call(&mut self, name: String) -> ParseResult<Expression> {
        let func = BuiltinFunction::from_name(&name);

        self.advance(); // consume '('

        let mut args = Vec::new();

        if self.current_token == Token::RParen {
            self.advance();
            return Ok(Expression::FunctionCall { func, args });
        }

        args.push(self.parse_range_or_expression(&func, 0)?);

        let mut index = 1;
        while self.current_token == Token::Comma {
            self.advance();
            args.push(self.parse_range_or_expression(&func, index)?);
            index += 1;
        }

        self.expect(Token::RParen)?;

        Ok(Expression::FunctionCall { func, args })
    }

    /// A bare `A1:B2` range is only a legal expression when it appears as a
    /// direct argument to a range-accepting function; other
    /// positions just parse the ordinary expression grammar, where a Range
    /// node can still appear nested inside it but is rejected by the
    /// evaluator rather than the parser (simpler, and matches the grammar's
    /// single entry point `parse_expression`).
    fn parse_range_or_expression(
        &mut self,
        _func: &BuiltinFunction,
        _index: usize,
    ) -> ParseResult<Expression> {
        self.parse_expression()
    }
}

/// Converts column letters to a 1-based column number.
/// A=1, B=2, ..., Z=26, AA=27, ..., ZZZZ=475254. Saturates on overflow so
/// that absurdly long letter runs still parse (they are rejected later as
/// BADREF by the engine's coordinate bounds check).
fn col_letters_to_number(letters: &str) -> u32 {
    let mut result: u32 = 0;
    for ch in letters.chars() {
        let val = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        result = match result.checked_mul(26).and_then(|r| r.checked_add(val)) {
            Some(r) => r,
            None => return u32::MAX,
        };
    }
    result
}

/// Splits a cell reference string like "A1" or "AA100" into column letters
/// and row number.
fn split_cell_reference(identifier: &str) -> ParseResult<(String, u32)> {
    let mut col = String::new();
    let mut row_str = String::new();

    for ch in identifier.chars() {
        if ch.is_ascii_alphabetic() {
            if !row_str.is_empty() {
                return Err(ParseError::new(format!(
                    "Invalid cell reference: {}",
                    identifier
                )));
            }
            col.push(ch);
        } else if ch.is_ascii_digit() {
            row_str.push(ch);
        } else {
            return Err(ParseError::new(format!(
                "Invalid character in cell reference: {}",
                ch
            )));
        }
    }

    if col.is_empty() {
        return Err(ParseError::new(format!(
            "Cell reference missing column: {}",
            identifier
        )));
    }
    if row_str.is_empty() {
        return Err(ParseError::new(format!(
            "Cell reference missing row: {}",
            identifier
        )));
    }

    let row: u32 = row_str.parse().map_err(|_| {
        ParseError::new(format!(
            "Invalid row number in cell reference: {}",
            identifier
        ))
    })?;

    if row == 0 {
        return Err(ParseError::new(format!(
            "Row number must be >= 1: {}",
            identifier
        )));
    }

    Ok((col.to_uppercase(), row))
}

/// Convenience function to parse a formula's expression body (the part
/// after any leading `=`, which callers strip themselves).
pub fn parse(input: &str) -> ParseResult<Expression> {
    let mut parser = Parser::new(input);
    parser.parse()
}
