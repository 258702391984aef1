//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: Evaluates a parsed formula AST against workbook state, producing
//! a value and, as a side effect, the set of cells the formula directly
//! depends on.
//!
//! CONTEXT: Dependency collection rides along with evaluation rather than
//! being a separate AST walk, so that lazy arguments (IF, IFERROR, CHOOSE,
//! AND, OR) contribute zero dependencies for the branch not taken: the
//! branch is simply never evaluated, so its cell references are never
//! visited and never recorded. The side channel lives in a `RefCell` the
//! same way the reference parser's UI-effect queue does, since `evaluate`
//! takes `&self` but needs to accumulate state across nested calls.

use std::cell::RefCell;
use std::collections::HashSet;

use parser::{BinaryOperator, BuiltinFunction, CellErrorKind, CellRefPart, Expression, UnaryOperator, Value};

use crate::cell::CellValue;
use crate::coord::{CellCoord, SheetId};
use crate::functions;
use crate::workbook::Workbook;

/// The result of evaluating an expression or sub-expression. Distinct from
/// `CellValue` in that it additionally distinguishes a bare empty cell
/// reference from a literal, and can carry an array (only ever produced by
/// a `Range`, and only ever consumed by a range-accepting function).
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellErrorKind),
    Array(Vec<EvalResult>),
}

impl EvalResult {
    pub fn is_error(&self) -> bool {
        matches!(self, EvalResult::Error(_))
    }

    pub fn error(&self) -> Option<CellErrorKind> {
        match self {
            EvalResult::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Coerces to a number: empty cells read as zero, booleans as 0/1,
    /// numeric-looking text is parsed, anything else is a VALUE error.
    pub fn as_number(&self) -> Result<f64, CellErrorKind> {
        match self {
            EvalResult::Empty => Ok(0.0),
            EvalResult::Number(n) => Ok(*n),
            EvalResult::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            EvalResult::Text(s) => s.trim().parse::<f64>().map_err(|_| CellErrorKind::Value),
            EvalResult::Error(e) => Err(*e),
            EvalResult::Array(items) => items.first().map(EvalResult::as_number).unwrap_or(Ok(0.0)),
        }
    }

    /// Coerces to text: empty cells read as the empty string.
    pub fn as_text(&self) -> Result<String, CellErrorKind> {
        match self {
            EvalResult::Empty => Ok(String::new()),
            EvalResult::Number(n) => Ok(CellValue::Number(*n).display_value()),
            EvalResult::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            EvalResult::Text(s) => Ok(s.clone()),
            EvalResult::Error(e) => Err(*e),
            EvalResult::Array(items) => items.first().map(EvalResult::as_text).unwrap_or(Ok(String::new())),
        }
    }

    /// Coerces to a boolean: empty cells read as false.
    pub fn as_boolean(&self) -> Result<bool, CellErrorKind> {
        match self {
            EvalResult::Empty => Ok(false),
            EvalResult::Boolean(b) => Ok(*b),
            EvalResult::Number(n) => Ok(*n != 0.0),
            EvalResult::Text(s) => match s.to_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(CellErrorKind::Value),
            },
            EvalResult::Error(e) => Err(*e),
            EvalResult::Array(items) => items.first().map(EvalResult::as_boolean).unwrap_or(Ok(false)),
        }
    }

    pub fn to_cell_value(&self) -> CellValue {
        match self {
            EvalResult::Empty => CellValue::Empty,
            EvalResult::Number(n) => CellValue::Number(*n),
            EvalResult::Text(s) => CellValue::Text(s.clone()),
            EvalResult::Boolean(b) => CellValue::Boolean(*b),
            EvalResult::Error(e) => CellValue::Error(*e),
            EvalResult::Array(items) => items.first().map(EvalResult::to_cell_value).unwrap_or(CellValue::Empty),
        }
    }

    fn flatten_numbers(&self, out: &mut Vec<f64>) -> Result<(), CellErrorKind> {
        match self {
            EvalResult::Empty => Ok(()),
            EvalResult::Array(items) => {
                for item in items {
                    item.flatten_numbers(out)?;
                }
                Ok(())
            }
            EvalResult::Error(e) => Err(*e),
            other => {
                out.push(other.as_number()?);
                Ok(())
            }
        }
    }
}

/// Evaluates a single formula against workbook state, relative to the
/// sheet the formula lives on (so unqualified references resolve there).
pub struct Evaluator<'a> {
    workbook: &'a Workbook,
    current_sheet: SheetId,
    deps: RefCell<HashSet<CellCoord>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(workbook: &'a Workbook, current_sheet: SheetId) -> Self {
        Evaluator {
            workbook,
            current_sheet,
            deps: RefCell::new(HashSet::new()),
        }
    }

    /// Consumes the evaluator, returning the final value and the set of
    /// cells touched while producing it.
    pub fn run(self, expr: &Expression) -> (EvalResult, HashSet<CellCoord>) {
        let result = self.evaluate(expr);
        (result, self.deps.into_inner())
    }

    fn resolve_sheet(&self, sheet: &Option<String>) -> Option<SheetId> {
        match sheet {
            None => Some(self.current_sheet),
            Some(name) => self.workbook.resolve_sheet_name(name),
        }
    }

    fn record_dependency(&self, coord: CellCoord) {
        self.deps.borrow_mut().insert(coord);
    }

    fn eval_cell_ref(&self, sheet: &Option<String>, reference: &CellRefPart) -> EvalResult {
        let Some(sheet_id) = self.resolve_sheet(sheet) else {
            return EvalResult::Error(CellErrorKind::BadRef);
        };
        let coord = CellCoord::new(sheet_id, reference.col, reference.row);
        if !coord.in_bounds() {
            return EvalResult::Error(CellErrorKind::BadRef);
        }
        self.record_dependency(coord);
        match self.workbook.get_cell_value(coord) {
            Some(value) => eval_result_from_cell_value(&value),
            None => EvalResult::Empty,
        }
    }

    /// Evaluates a range into a flat array, in row-major order, recording
    /// every cell in the rectangle (present or not) as a dependency.
    fn eval_range(&self, sheet: &Option<String>, start: &CellRefPart, end: &CellRefPart) -> EvalResult {
        let Some(sheet_id) = self.resolve_sheet(sheet) else {
            return EvalResult::Error(CellErrorKind::BadRef);
        };
        let (c0, c1) = (start.col.min(end.col), start.col.max(end.col));
        let (r0, r1) = (start.row.min(end.row), start.row.max(end.row));
        let top_left = CellCoord::new(sheet_id, c0, r0);
        let bottom_right = CellCoord::new(sheet_id, c1, r1);
        if !top_left.in_bounds() || !bottom_right.in_bounds() {
            return EvalResult::Error(CellErrorKind::BadRef);
        }

        let mut rows = Vec::with_capacity((r1 - r0 + 1) as usize);
        for row in r0..=r1 {
            let mut cols = Vec::with_capacity((c1 - c0 + 1) as usize);
            for col in c0..=c1 {
                let coord = CellCoord::new(sheet_id, col, row);
                self.record_dependency(coord);
                cols.push(match self.workbook.get_cell_value(coord) {
                    Some(value) => eval_result_from_cell_value(&value),
                    None => EvalResult::Empty,
                });
            }
            rows.push(EvalResult::Array(cols));
        }
        EvalResult::Array(rows)
    }

    /// 2D view of a range, as rows of cells, used by HLOOKUP/VLOOKUP.
    fn eval_range_grid(&self, sheet: &Option<String>, start: &CellRefPart, end: &CellRefPart) -> Option<Vec<Vec<EvalResult>>> {
        match self.eval_range(sheet, start, end) {
            EvalResult::Array(rows) => Some(
                rows.into_iter()
                    .map(|row| match row {
                        EvalResult::Array(cols) => cols,
                        other => vec![other],
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn evaluate(&self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Literal(value) => eval_result_from_literal(value),
            Expression::CellRef { sheet, reference } => self.eval_cell_ref(sheet, reference),
            // A bare range outside of a range-accepting function argument
            // position is not a legal value; ranges are restricted to that
            // one syntactic position, so anything else is VALUE.
            Expression::Range { .. } => EvalResult::Error(CellErrorKind::Value),
            Expression::UnaryOp { op, operand } => self.eval_unary(*op, operand),
            Expression::BinaryOp { left, op, right } => self.eval_binary(*op, left, right),
            Expression::FunctionCall { func, args } => self.eval_function(func, args),
        }
    }

    /// Evaluates a function argument, honoring the range-as-argument
    /// restriction: a `Range` node is only evaluated as an array when the
    /// function accepts ranges, and rejected with VALUE otherwise.
    fn eval_arg(&self, func: &BuiltinFunction, arg: &Expression) -> EvalResult {
        if let Expression::Range { sheet, start, end } = arg {
            return if func.accepts_range_args() {
                self.eval_range(sheet, start, end)
            } else {
                EvalResult::Error(CellErrorKind::Value)
            };
        }
        self.evaluate(arg)
    }

    fn eval_unary(&self, op: UnaryOperator, operand: &Expression) -> EvalResult {
        let value = self.evaluate(operand);
        if let Some(e) = value.error() {
            return EvalResult::Error(e);
        }
        let n = match value.as_number() {
            Ok(n) => n,
            Err(e) => return EvalResult::Error(e),
        };
        match op {
            UnaryOperator::Negate => EvalResult::Number(-n),
            UnaryOperator::Plus => EvalResult::Number(n),
        }
    }

    fn eval_binary(&self, op: BinaryOperator, left: &Expression, right: &Expression) -> EvalResult {
        let l = self.evaluate(left);
        let r = self.evaluate(right);

        if matches!(
            op,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::GreaterThan
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterEqual
        ) {
            return self.eval_comparison(op, &l, &r);
        }

        if l.is_error() && r.is_error() {
            return EvalResult::Error(l.error().unwrap().combine(r.error().unwrap()));
        }
        if let Some(e) = l.error() {
            return EvalResult::Error(e);
        }
        if let Some(e) = r.error() {
            return EvalResult::Error(e);
        }

        if op == BinaryOperator::Concat {
            let (ls, rs) = match (l.as_text(), r.as_text()) {
                (Ok(ls), Ok(rs)) => (ls, rs),
                (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
            };
            return EvalResult::Text(format!("{}{}", ls, rs));
        }

        let (ln, rn) = match (l.as_number(), r.as_number()) {
            (Ok(ln), Ok(rn)) => (ln, rn),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };

        match op {
            BinaryOperator::Add => EvalResult::Number(ln + rn),
            BinaryOperator::Subtract => EvalResult::Number(ln - rn),
            BinaryOperator::Multiply => EvalResult::Number(ln * rn),
            BinaryOperator::Divide => {
                if rn == 0.0 {
                    EvalResult::Error(CellErrorKind::DivZero)
                } else {
                    EvalResult::Number(ln / rn)
                }
            }
            _ => unreachable!("comparison and concat handled above"),
        }
    }

    fn eval_comparison(&self, op: BinaryOperator, l: &EvalResult, r: &EvalResult) -> EvalResult {
        if l.is_error() && r.is_error() {
            return EvalResult::Error(l.error().unwrap().combine(r.error().unwrap()));
        }
        if let Some(e) = l.error() {
            return EvalResult::Error(e);
        }
        if let Some(e) = r.error() {
            return EvalResult::Error(e);
        }

        let ordering = compare_results(l, r);
        let result = match op {
            BinaryOperator::Equal => ordering == std::cmp::Ordering::Equal,
            BinaryOperator::NotEqual => ordering != std::cmp::Ordering::Equal,
            BinaryOperator::LessThan => ordering == std::cmp::Ordering::Less,
            BinaryOperator::GreaterThan => ordering == std::cmp::Ordering::Greater,
            BinaryOperator::LessEqual => ordering != std::cmp::Ordering::Greater,
            BinaryOperator::GreaterEqual => ordering != std::cmp::Ordering::Less,
            _ => unreachable!(),
        };
        EvalResult::Boolean(result)
    }

    fn eval_function(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        if !functions::is_known(func) {
            return EvalResult::Error(CellErrorKind::BadName);
        }
        if let Some(arity) = functions::arity(func) {
            if !arity.accepts(args.len()) {
                return EvalResult::Error(CellErrorKind::Value);
            }
        }

        use BuiltinFunction::*;
        match func {
            If => self.fn_if(args),
            IfError => self.fn_iferror(args),
            Choose => self.fn_choose(args),
            And => self.fn_and(args),
            Or => self.fn_or(args),
            Not => unary_bool(self.eval_arg(func, &args[0]), |b| !b),
            IsError => EvalResult::Boolean(self.eval_arg(func, &args[0]).is_error()),
            IsNumber => EvalResult::Boolean(matches!(self.eval_arg(func, &args[0]), EvalResult::Number(_))),
            IsText => EvalResult::Boolean(matches!(self.eval_arg(func, &args[0]), EvalResult::Text(_))),
            IsBlank => EvalResult::Boolean(matches!(self.eval_arg(func, &args[0]), EvalResult::Empty)),
            Indirect => self.fn_indirect(args),
            Sum => self.fold_numbers(func, args, 0.0, |acc, n| acc + n),
            Min => self.fold_numbers_opt(func, args, |acc, n| match acc {
                Some(m) if m <= n => Some(m),
                _ => Some(n),
            }),
            Max => self.fold_numbers_opt(func, args, |acc, n| match acc {
                Some(m) if m >= n => Some(m),
                _ => Some(n),
            }),
            Average => self.fn_average(func, args),
            Count => self.fn_count(func, args),
            CountA => self.fn_counta(func, args),
            Hlookup => self.fn_lookup(args, true),
            Vlookup => self.fn_lookup(args, false),
            Abs => unary_num(self.eval_arg(func, &args[0]), f64::abs),
            Sqrt => {
                let n = match self.eval_arg(func, &args[0]).as_number() {
                    Ok(n) => n,
                    Err(e) => return EvalResult::Error(e),
                };
                if n < 0.0 {
                    EvalResult::Error(CellErrorKind::Value)
                } else {
                    EvalResult::Number(n.sqrt())
                }
            }
            Int => unary_num(self.eval_arg(func, &args[0]), f64::floor),
            Sign => unary_num(self.eval_arg(func, &args[0]), |n| if n > 0.0 { 1.0 } else if n < 0.0 { -1.0 } else { 0.0 }),
            Round => self.fn_round(func, args),
            Floor => self.fn_floor_ceiling(func, args, f64::floor),
            Ceiling => self.fn_floor_ceiling(func, args, f64::ceil),
            Power => self.fn_binary_num(func, args, f64::powf),
            Mod => self.fn_mod(func, args),
            Len => unary_text(self.eval_arg(func, &args[0]), |s| EvalResult::Number(s.chars().count() as f64)),
            Upper => unary_text(self.eval_arg(func, &args[0]), |s| EvalResult::Text(s.to_uppercase())),
            Lower => unary_text(self.eval_arg(func, &args[0]), |s| EvalResult::Text(s.to_lowercase())),
            Trim => unary_text(self.eval_arg(func, &args[0]), |s| EvalResult::Text(s.trim().to_string())),
            Concatenate => self.fn_concatenate(func, args),
            Left => self.fn_left_right(func, args, true),
            Right => self.fn_left_right(func, args, false),
            Mid => self.fn_mid(func, args),
            Rept => self.fn_rept(func, args),
            Text => self.fn_text(func, args),
            Custom(_) => EvalResult::Error(CellErrorKind::BadName),
        }
    }

    fn fn_if(&self, args: &[Expression]) -> EvalResult {
        let cond = self.eval_arg(&BuiltinFunction::If, &args[0]);
        if let Some(e) = cond.error() {
            return EvalResult::Error(e);
        }
        let cond = match cond.as_boolean() {
            Ok(b) => b,
            Err(e) => return EvalResult::Error(e),
        };
        if cond {
            self.eval_arg(&BuiltinFunction::If, &args[1])
        } else if args.len() == 3 {
            self.eval_arg(&BuiltinFunction::If, &args[2])
        } else {
            EvalResult::Boolean(false)
        }
    }

    fn fn_iferror(&self, args: &[Expression]) -> EvalResult {
        let value = self.eval_arg(&BuiltinFunction::IfError, &args[0]);
        if value.is_error() {
            self.eval_arg(&BuiltinFunction::IfError, &args[1])
        } else {
            value
        }
    }

    fn fn_choose(&self, args: &[Expression]) -> EvalResult {
        let idx = match self.eval_arg(&BuiltinFunction::Choose, &args[0]).as_number() {
            Ok(n) => n as i64,
            Err(e) => return EvalResult::Error(e),
        };
        if idx < 1 || idx as usize >= args.len() {
            return EvalResult::Error(CellErrorKind::Value);
        }
        self.eval_arg(&BuiltinFunction::Choose, &args[idx as usize])
    }

    fn fn_and(&self, args: &[Expression]) -> EvalResult {
        for arg in args {
            let v = self.eval_arg(&BuiltinFunction::And, arg);
            if let Some(e) = v.error() {
                return EvalResult::Error(e);
            }
            match v.as_boolean() {
                Ok(false) => return EvalResult::Boolean(false),
                Ok(true) => continue,
                Err(e) => return EvalResult::Error(e),
            }
        }
        EvalResult::Boolean(true)
    }

    fn fn_or(&self, args: &[Expression]) -> EvalResult {
        for arg in args {
            let v = self.eval_arg(&BuiltinFunction::Or, arg);
            if let Some(e) = v.error() {
                return EvalResult::Error(e);
            }
            match v.as_boolean() {
                Ok(true) => return EvalResult::Boolean(true),
                Ok(false) => continue,
                Err(e) => return EvalResult::Error(e),
            }
        }
        EvalResult::Boolean(false)
    }

    /// INDIRECT(ref_text): parses `ref_text` as a bare cell reference and
    /// resolves it exactly like a literal reference in the formula would,
    /// including dependency registration. A cyclic INDIRECT chain isn't
    /// caught here; it surfaces as CIRCREF once the scheduler runs strongly
    /// connected components over the batch that created it.
    fn fn_indirect(&self, args: &[Expression]) -> EvalResult {
        let text = match self.eval_arg(&BuiltinFunction::Indirect, &args[0]).as_text() {
            Ok(s) => s,
            Err(e) => return EvalResult::Error(e),
        };
        match parser::parse(&text) {
            Ok(Expression::CellRef { sheet, reference }) => self.eval_cell_ref(&sheet, &reference),
            _ => EvalResult::Error(CellErrorKind::BadRef),
        }
    }

    fn collect_numbers(&self, func: &BuiltinFunction, args: &[Expression]) -> Result<Vec<f64>, CellErrorKind> {
        let mut out = Vec::new();
        for arg in args {
            self.eval_arg(func, arg).flatten_numbers(&mut out)?;
        }
        Ok(out)
    }

    fn fold_numbers(&self, func: &BuiltinFunction, args: &[Expression], init: f64, f: impl Fn(f64, f64) -> f64) -> EvalResult {
        match self.collect_numbers(func, args) {
            Ok(nums) => EvalResult::Number(nums.into_iter().fold(init, f)),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fold_numbers_opt(&self, func: &BuiltinFunction, args: &[Expression], f: impl Fn(Option<f64>, f64) -> Option<f64>) -> EvalResult {
        match self.collect_numbers(func, args) {
            Ok(nums) => EvalResult::Number(nums.into_iter().fold(None, f).unwrap_or(0.0)),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_average(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(func, args) {
            Ok(nums) if nums.is_empty() => EvalResult::Error(CellErrorKind::DivZero),
            Ok(nums) => EvalResult::Number(nums.iter().sum::<f64>() / nums.len() as f64),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_count(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        // COUNT only tallies numeric cells; non-numeric text inside a range
        // is silently skipped rather than erroring the whole call.
        let mut count = 0usize;
        for arg in args {
            count_leaves(&self.eval_arg(func, arg), &mut count, |r| matches!(r, EvalResult::Number(_)));
        }
        EvalResult::Number(count as f64)
    }

    fn fn_counta(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let mut count = 0usize;
        for arg in args {
            count_leaves(&self.eval_arg(func, arg), &mut count, |r| !matches!(r, EvalResult::Empty));
        }
        EvalResult::Number(count as f64)
    }

    fn fn_lookup(&self, args: &[Expression], horizontal: bool) -> EvalResult {
        let func = if horizontal { BuiltinFunction::Hlookup } else { BuiltinFunction::Vlookup };
        let lookup = self.eval_arg(&func, &args[0]);
        if let Some(e) = lookup.error() {
            return EvalResult::Error(e);
        }

        let grid = match &args[1] {
            Expression::Range { sheet, start, end } => match self.eval_range_grid(sheet, start, end) {
                Some(g) => g,
                None => return EvalResult::Error(CellErrorKind::BadRef),
            },
            _ => return EvalResult::Error(CellErrorKind::Value),
        };

        let index = match self.evaluate(&args[2]).as_number() {
            Ok(n) => n as i64,
            Err(e) => return EvalResult::Error(e),
        };

        let approximate = match args.get(3) {
            Some(expr) => match self.evaluate(expr).as_boolean() {
                Ok(b) => b,
                Err(e) => return EvalResult::Error(e),
            },
            None => true,
        };

        // HLOOKUP searches the first row and reads down `index` rows;
        // VLOOKUP searches the first column and reads across `index` cols.
        let (keys, line_count): (Vec<&EvalResult>, usize) = if horizontal {
            (grid.first().map(|r| r.iter().collect()).unwrap_or_default(), grid.len())
        } else {
            (grid.iter().filter_map(|row| row.first()).collect(), grid.first().map(|r| r.len()).unwrap_or(0))
        };

        if index < 1 || index as usize > line_count {
            return EvalResult::Error(CellErrorKind::Value);
        }

        let found = if approximate {
            keys.iter()
                .enumerate()
                .filter(|(_, key)| compare_results(key, &lookup) != std::cmp::Ordering::Greater)
                .last()
                .map(|(i, _)| i)
        } else {
            keys.iter().position(|key| compare_results(key, &lookup) == std::cmp::Ordering::Equal)
        };

        match found {
            Some(i) => {
                if horizontal {
                    grid.get(index as usize - 1).and_then(|row| row.get(i)).cloned().unwrap_or(EvalResult::Empty)
                } else {
                    grid.get(i).and_then(|row| row.get(index as usize - 1)).cloned().unwrap_or(EvalResult::Empty)
                }
            }
            None => EvalResult::Error(CellErrorKind::Value),
        }
    }

    fn fn_round(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let (n, digits) = match (self.eval_arg(func, &args[0]).as_number(), self.eval_arg(func, &args[1]).as_number()) {
            (Ok(n), Ok(d)) => (n, d),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };
        let factor = 10f64.powf(digits);
        EvalResult::Number((n * factor).round() / factor)
    }

    fn fn_floor_ceiling(&self, func: &BuiltinFunction, args: &[Expression], op: impl Fn(f64) -> f64) -> EvalResult {
        let (n, significance) = match (self.eval_arg(func, &args[0]).as_number(), self.eval_arg(func, &args[1]).as_number()) {
            (Ok(n), Ok(s)) => (n, s),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };
        if significance == 0.0 {
            return EvalResult::Error(CellErrorKind::DivZero);
        }
        EvalResult::Number(op(n / significance) * significance)
    }

    fn fn_binary_num(&self, func: &BuiltinFunction, args: &[Expression], op: impl Fn(f64, f64) -> f64) -> EvalResult {
        match (self.eval_arg(func, &args[0]).as_number(), self.eval_arg(func, &args[1]).as_number()) {
            (Ok(a), Ok(b)) => EvalResult::Number(op(a, b)),
            (Err(e), _) | (_, Err(e)) => EvalResult::Error(e),
        }
    }

    fn fn_mod(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let (n, d) = match (self.eval_arg(func, &args[0]).as_number(), self.eval_arg(func, &args[1]).as_number()) {
            (Ok(n), Ok(d)) => (n, d),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };
        if d == 0.0 {
            return EvalResult::Error(CellErrorKind::DivZero);
        }
        EvalResult::Number(n - d * (n / d).floor())
    }

    fn fn_concatenate(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let mut out = String::new();
        for arg in args {
            match self.eval_arg(func, arg).as_text() {
                Ok(s) => out.push_str(&s),
                Err(e) => return EvalResult::Error(e),
            }
        }
        EvalResult::Text(out)
    }

    fn fn_left_right(&self, func: &BuiltinFunction, args: &[Expression], left: bool) -> EvalResult {
        let text = match self.eval_arg(func, &args[0]).as_text() {
            Ok(s) => s,
            Err(e) => return EvalResult::Error(e),
        };
        let count = match args.get(1) {
            Some(expr) => match self.eval_arg(func, expr).as_number() {
                Ok(n) => n as usize,
                Err(e) => return EvalResult::Error(e),
            },
            None => 1,
        };
        let chars: Vec<char> = text.chars().collect();
        let n = count.min(chars.len());
        let slice: String = if left {
            chars[..n].iter().collect()
        } else {
            chars[chars.len() - n..].iter().collect()
        };
        EvalResult::Text(slice)
    }

    fn fn_mid(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let text = match self.eval_arg(func, &args[0]).as_text() {
            Ok(s) => s,
            Err(e) => return EvalResult::Error(e),
        };
        let (start, len) = match (self.eval_arg(func, &args[1]).as_number(), self.eval_arg(func, &args[2]).as_number()) {
            (Ok(s), Ok(l)) => (s as i64, l as i64),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };
        if start < 1 || len < 0 {
            return EvalResult::Error(CellErrorKind::Value);
        }
        let chars: Vec<char> = text.chars().collect();
        let start_idx = (start as usize - 1).min(chars.len());
        let end_idx = (start_idx + len as usize).min(chars.len());
        EvalResult::Text(chars[start_idx..end_idx].iter().collect())
    }

    fn fn_rept(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        let (text, times) = match (self.eval_arg(func, &args[0]).as_text(), self.eval_arg(func, &args[1]).as_number()) {
            (Ok(s), Ok(n)) => (s, n),
            (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
        };
        if times < 0.0 {
            return EvalResult::Error(CellErrorKind::Value);
        }
        EvalResult::Text(text.repeat(times as usize))
    }

    fn fn_text(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        // A simplified TEXT: the format argument only distinguishes integer
        // vs. fixed-decimal renderings, since the engine carries no general
        // number-format mini-language.
        let n = match self.eval_arg(func, &args[0]).as_number() {
            Ok(n) => n,
            Err(e) => return EvalResult::Error(e),
        };
        let fmt = match self.eval_arg(func, &args[1]).as_text() {
            Ok(s) => s,
            Err(e) => return EvalResult::Error(e),
        };
        let decimals = fmt.find('.').map(|dot| fmt[dot + 1..].chars().filter(|c| *c == '0' || *c == '#').count()).unwrap_or(0);
        EvalResult::Text(format!("{:.*}", decimals, n))
    }
}

fn unary_num(value: EvalResult, f: impl Fn(f64) -> f64) -> EvalResult {
    match value.as_number() {
        Ok(n) => EvalResult::Number(f(n)),
        Err(e) => EvalResult::Error(e),
    }
}

fn unary_bool(value: EvalResult, f: impl Fn(bool) -> bool) -> EvalResult {
    match value.as_boolean() {
        Ok(b) => EvalResult::Boolean(f(b)),
        Err(e) => EvalResult::Error(e),
    }
}

fn unary_text(value: EvalResult, f: impl Fn(&str) -> EvalResult) -> EvalResult {
    match value.as_text() {
        Ok(s) => f(&s),
        Err(e) => EvalResult::Error(e),
    }
}

fn count_leaves(result: &EvalResult, count: &mut usize, matches: impl Fn(&EvalResult) -> bool + Copy) {
    match result {
        EvalResult::Array(items) => {
            for item in items {
                count_leaves(item, count, matches);
            }
        }
        other => {
            if matches(other) {
                *count += 1;
            }
        }
    }
}

/// Compares two scalar results by type-category ranking: numbers sort
/// before text, which sorts before booleans. Error operands never
/// reach here; callers short-circuit on an error before comparing.
///
/// An `Empty` operand takes on the other side's category and that
/// category's default value (0, "", or false) rather than being bucketed
/// with numbers outright: `Empty` vs. `Boolean` compares as `false` vs.
/// the boolean, and `Empty` vs. `Text` compares as `""` vs. the text.
pub(crate) fn compare_results(a: &EvalResult, b: &EvalResult) -> std::cmp::Ordering {
    fn category(r: &EvalResult) -> u8 {
        match r {
            EvalResult::Text(_) => 1,
            EvalResult::Boolean(_) => 2,
            _ => 0,
        }
    }
    fn resolve(r: &EvalResult, other_category: u8) -> EvalResult {
        match r {
            EvalResult::Empty => match other_category {
                1 => EvalResult::Text(String::new()),
                2 => EvalResult::Boolean(false),
                _ => EvalResult::Number(0.0),
            },
            other => other.clone(),
        }
    }

    let (cat_a, cat_b) = (category(a), category(b));
    let a = resolve(a, cat_b);
    let b = resolve(b, cat_a);
    let (ra, rb) = (category(&a), category(&b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (&a, &b) {
        (EvalResult::Text(x), EvalResult::Text(y)) => x.to_uppercase().cmp(&y.to_uppercase()),
        (EvalResult::Boolean(x), EvalResult::Boolean(y)) => x.cmp(y),
        _ => a.as_number().unwrap_or(0.0).partial_cmp(&b.as_number().unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal),
    }
}

fn eval_result_from_literal(value: &Value) -> EvalResult {
    match value {
        Value::Number(n) => EvalResult::Number(*n),
        Value::String(s) => EvalResult::Text(s.clone()),
        Value::Boolean(b) => EvalResult::Boolean(*b),
        Value::Error(e) => EvalResult::Error(*e),
    }
}

pub(crate) fn eval_result_from_cell_value(value: &CellValue) -> EvalResult {
    match value {
        CellValue::Empty => EvalResult::Empty,
        CellValue::Number(n) => EvalResult::Number(*n),
        CellValue::Text(s) => EvalResult::Text(s.clone()),
        CellValue::Boolean(b) => EvalResult::Boolean(*b),
        CellValue::Error(e) => EvalResult::Error(*e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Workbook;

    fn wb_with_formula(sheet: &str, cell: &str, contents: &str) -> (Workbook, SheetId) {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet(sheet).unwrap();
        wb.set_cell_contents(sid, cell, contents.to_string()).unwrap();
        (wb, sid)
    }

    #[test]
    fn arithmetic_precedence_and_value() {
        let (wb, sid) = wb_with_formula("Sheet1", "A1", "=1+2*3");
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Number(7.0));
    }

    #[test]
    fn empty_cell_reads_as_zero_in_arithmetic() {
        let (wb, sid) = wb_with_formula("Sheet1", "A1", "=B1+1");
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Number(1.0));
    }

    #[test]
    fn division_by_zero_is_div_zero_error() {
        let (wb, sid) = wb_with_formula("Sheet1", "A1", "=1/0");
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Error(CellErrorKind::DivZero));
    }

    #[test]
    fn reference_to_missing_sheet_is_bad_ref() {
        let (wb, sid) = wb_with_formula("Sheet1", "A1", "=Nope!A1");
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Error(CellErrorKind::BadRef));
    }

    #[test]
    fn sum_over_a_range_adds_present_cells() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        wb.set_cell_contents(sid, "A1", "1".to_string()).unwrap();
        wb.set_cell_contents(sid, "A2", "2".to_string()).unwrap();
        wb.set_cell_contents(sid, "A3", "=SUM(A1:A2)".to_string()).unwrap();
        assert_eq!(wb.get_cell_value_at(sid, "A3"), CellValue::Number(3.0));
    }

    #[test]
    fn if_does_not_evaluate_the_untaken_branch() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        // B1 is never set, so referencing it in the untaken branch must not
        // register a dependency or error.
        wb.set_cell_contents(sid, "A1", "=IF(TRUE, 1, B1/0)".to_string()).unwrap();
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Number(1.0));
    }

    #[test]
    fn empty_cell_compares_equal_to_false_not_just_zero() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        // B1 is never set; comparing against FALSE must adopt the boolean
        // category's default (false), not fall through to the numeric 0
        // bucket, which would make this comparison cross-category and false.
        wb.set_cell_contents(sid, "A1", "=B1=FALSE".to_string()).unwrap();
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Boolean(true));
    }

    #[test]
    fn empty_cell_compares_equal_to_empty_string() {
        let mut wb = Workbook::new();
        let sid = wb.create_sheet("Sheet1").unwrap();
        wb.set_cell_contents(sid, "A1", "=B1=\"\"".to_string()).unwrap();
        assert_eq!(wb.get_cell_value_at(sid, "A1"), CellValue::Boolean(true));
    }
}
