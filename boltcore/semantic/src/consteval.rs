//! Compile-time constant expression evaluation. CONSTANT right-hand sides
//! and array dimensions run through here; the whitelist of pure functions
//! mirrors what the runtime computes so `constant_eval(e) = runtime_eval(e)`
//! on the supported subset.

use bolt_ast::{BinOp, Expr, ExprKind, UnaryOp};
use bolt_common::SourceLocation;
use bolt_registry::ConstValue;

use crate::symbols::{canon, SymbolTable};

/// Side note emitted during evaluation (e.g. a VAL parse failure that was
/// coerced to zero). Surfaced as a warning in strict mode.
#[derive(Debug, Clone)]
pub struct EvalNote {
    pub code: &'static str,
    pub message: String,
    pub location: SourceLocation,
}

pub type EvalResult = std::result::Result<ConstValue, EvalNote>;

fn fail(code: &'static str, message: String, location: SourceLocation) -> EvalResult {
    Err(EvalNote { code, message, location })
}

/// Evaluate a constant expression against the already-collected constants.
pub fn evaluate_const_expr(expr: &Expr, symbols: &SymbolTable, notes: &mut Vec<EvalNote>) -> EvalResult {
    match &expr.kind {
        ExprKind::Number(v) => {
            // Integral literals stay integers so INT op INT folds to INT.
            if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                Ok(ConstValue::Int(*v as i64))
            } else {
                Ok(ConstValue::Num(*v))
            }
        }
        ExprKind::Str(s) => Ok(ConstValue::Str(s.clone())),
        ExprKind::Var(name) => match symbols.lookup_constant(&canon(name)) {
            Some(sym) => Ok(sym.value.clone()),
            None => fail(
                "UNDEFINED_CONSTANT",
                format!("undefined constant: {}", name),
                expr.loc,
            ),
        },
        ExprKind::Unary { op, expr: inner } => {
            let v = evaluate_const_expr(inner, symbols, notes)?;
            match op {
                UnaryOp::Neg => match v {
                    ConstValue::Int(n) => Ok(ConstValue::Int(-n)),
                    ConstValue::Num(n) => Ok(ConstValue::Num(-n)),
                    ConstValue::Str(_) => {
                        fail("TYPE_MISMATCH", "cannot negate a string".to_string(), expr.loc)
                    }
                },
                UnaryOp::Plus => Ok(v),
                UnaryOp::Not => Ok(ConstValue::Int(!v.as_int())),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let left = evaluate_const_expr(lhs, symbols, notes)?;
            let right = evaluate_const_expr(rhs, symbols, notes)?;
            eval_binary(*op, left, right, expr.loc)
        }
        ExprKind::FunctionCall { name, args, .. } => eval_function(name, args, symbols, notes, expr.loc),
        // The grammar parses `SIN(X)` as an ambiguous array access.
        ExprKind::ArrayAccess { name, indices } => eval_function(name, indices, symbols, notes, expr.loc),
        _ => fail(
            "NOT_CONSTANT",
            "expression not supported in constant evaluation".to_string(),
            expr.loc,
        ),
    }
}

fn eval_binary(op: BinOp, left: ConstValue, right: ConstValue, loc: SourceLocation) -> EvalResult {
    // String concatenation: `+` with a string on either side.
    if op == BinOp::Add && (matches!(left, ConstValue::Str(_)) || matches!(right, ConstValue::Str(_))) {
        return Ok(ConstValue::Str(format!("{}{}", left.as_string(), right.as_string())));
    }
    if !left.is_numeric() || !right.is_numeric() {
        return fail(
            "TYPE_MISMATCH",
            "constant expression requires numeric operands".to_string(),
            loc,
        );
    }
    let both_int = matches!((&left, &right), (ConstValue::Int(_), ConstValue::Int(_)));
    match op {
        BinOp::Add => Ok(if both_int {
            ConstValue::Int(left.as_int().wrapping_add(right.as_int()))
        } else {
            ConstValue::Num(left.as_double() + right.as_double())
        }),
        BinOp::Sub => Ok(if both_int {
            ConstValue::Int(left.as_int().wrapping_sub(right.as_int()))
        } else {
            ConstValue::Num(left.as_double() - right.as_double())
        }),
        BinOp::Mul => Ok(if both_int {
            ConstValue::Int(left.as_int().wrapping_mul(right.as_int()))
        } else {
            ConstValue::Num(left.as_double() * right.as_double())
        }),
        // Division and power always promote to double.
        BinOp::Div => Ok(ConstValue::Num(left.as_double() / right.as_double())),
        BinOp::Pow => Ok(ConstValue::Num(left.as_double().powf(right.as_double()))),
        BinOp::Mod => {
            if both_int {
                let d = right.as_int();
                if d == 0 {
                    return fail("DIVISION_BY_ZERO", "MOD by zero in constant expression".to_string(), loc);
                }
                Ok(ConstValue::Int(left.as_int() % d))
            } else {
                Ok(ConstValue::Num(left.as_double() % right.as_double()))
            }
        }
        BinOp::IntDiv => {
            let d = right.as_int();
            if d == 0 {
                return fail("DIVISION_BY_ZERO", "integer division by zero in constant expression".to_string(), loc);
            }
            Ok(ConstValue::Int(left.as_int() / d))
        }
        BinOp::And => Ok(ConstValue::Int(left.as_int() & right.as_int())),
        BinOp::Or => Ok(ConstValue::Int(left.as_int() | right.as_int())),
        BinOp::Xor => Ok(ConstValue::Int(left.as_int() ^ right.as_int())),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let truth = match op {
                BinOp::Eq => left.as_double() == right.as_double(),
                BinOp::Ne => left.as_double() != right.as_double(),
                BinOp::Lt => left.as_double() < right.as_double(),
                BinOp::Le => left.as_double() <= right.as_double(),
                BinOp::Gt => left.as_double() > right.as_double(),
                _ => left.as_double() >= right.as_double(),
            };
            Ok(ConstValue::Int(if truth { 1 } else { 0 }))
        }
    }
}

fn eval_function(
    name: &str,
    args: &[Expr],
    symbols: &SymbolTable,
    notes: &mut Vec<EvalNote>,
    loc: SourceLocation,
) -> EvalResult {
    let upper = canon(name);
    let mut vals = Vec::with_capacity(args.len());
    for a in args {
        vals.push(evaluate_const_expr(a, symbols, notes)?);
    }
    let one = |vals: &[ConstValue]| vals[0].as_double();
    match (upper.as_str(), vals.len()) {
        ("ABS", 1) => Ok(match &vals[0] {
            ConstValue::Int(n) => ConstValue::Int(n.abs()),
            v => ConstValue::Num(v.as_double().abs()),
        }),
        ("SIN", 1) => Ok(ConstValue::Num(one(&vals).sin())),
        ("COS", 1) => Ok(ConstValue::Num(one(&vals).cos())),
        ("TAN", 1) => Ok(ConstValue::Num(one(&vals).tan())),
        ("ATN", 1) => Ok(ConstValue::Num(one(&vals).atan())),
        ("EXP", 1) => Ok(ConstValue::Num(one(&vals).exp())),
        ("LOG", 1) => Ok(ConstValue::Num(one(&vals).ln())),
        ("SQR", 1) => Ok(ConstValue::Num(one(&vals).sqrt())),
        ("INT", 1) => Ok(ConstValue::Int(one(&vals).floor() as i64)),
        ("SGN", 1) => {
            let v = one(&vals);
            Ok(ConstValue::Int(if v > 0.0 {
                1
            } else if v < 0.0 {
                -1
            } else {
                0
            }))
        }
        ("LEN", 1) => match &vals[0] {
            ConstValue::Str(s) => Ok(ConstValue::Int(s.chars().count() as i64)),
            _ => fail("TYPE_MISMATCH", "LEN requires a string argument".to_string(), loc),
        },
        ("LEFT$", 2) => match &vals[0] {
            ConstValue::Str(s) => {
                let n = vals[1].as_int().max(0) as usize;
                Ok(ConstValue::Str(s.chars().take(n).collect()))
            }
            _ => fail("TYPE_MISMATCH", "LEFT$ requires a string argument".to_string(), loc),
        },
        ("RIGHT$", 2) => match &vals[0] {
            ConstValue::Str(s) => {
                let n = vals[1].as_int().max(0) as usize;
                let count = s.chars().count();
                Ok(ConstValue::Str(s.chars().skip(count.saturating_sub(n)).collect()))
            }
            _ => fail("TYPE_MISMATCH", "RIGHT$ requires a string argument".to_string(), loc),
        },
        ("MID$", 2) | ("MID$", 3) => match &vals[0] {
            ConstValue::Str(s) => {
                // BASIC positions are 1-based.
                let start = (vals[1].as_int() - 1).max(0) as usize;
                let rest = s.chars().skip(start);
                let out: String = if vals.len() == 3 {
                    rest.take(vals[2].as_int().max(0) as usize).collect()
                } else {
                    rest.collect()
                };
                Ok(ConstValue::Str(out))
            }
            _ => fail("TYPE_MISMATCH", "MID$ requires a string argument".to_string(), loc),
        },
        ("CHR$", 1) => {
            let code = vals[0].as_int();
            if !(0..=255).contains(&code) {
                return fail("TYPE_MISMATCH", "CHR$ argument must be 0-255".to_string(), loc);
            }
            Ok(ConstValue::Str((code as u8 as char).to_string()))
        }
        ("STR$", 1) => Ok(ConstValue::Str(vals[0].as_string())),
        ("VAL", 1) => match &vals[0] {
            ConstValue::Str(s) => {
                let trimmed = s.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    Ok(ConstValue::Int(n))
                } else if let Ok(n) = trimmed.parse::<f64>() {
                    Ok(ConstValue::Num(n))
                } else {
                    // Dialect compatibility: unparseable input is zero.
                    notes.push(EvalNote {
                        code: "VAL_PARSE",
                        message: format!("VAL could not parse \"{}\"; result is 0", s),
                        location: loc,
                    });
                    Ok(ConstValue::Num(0.0))
                }
            }
            v => Ok(v.clone()),
        },
        ("MIN", 2) => Ok(ConstValue::Num(vals[0].as_double().min(vals[1].as_double()))),
        ("MAX", 2) => Ok(ConstValue::Num(vals[0].as_double().max(vals[1].as_double()))),
        _ => fail(
            "NOT_CONSTANT",
            format!("function {} not supported in constant expressions or wrong argument count", upper),
            loc,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_common::SourceLocation;

    fn num(v: f64) -> Expr {
        Expr::number(v, SourceLocation::default())
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::Binary { op, lhs: Box::new(l), rhs: Box::new(r) }, SourceLocation::default())
    }

    fn eval(e: &Expr) -> ConstValue {
        let symbols = SymbolTable::new();
        let mut notes = Vec::new();
        evaluate_const_expr(e, &symbols, &mut notes).unwrap()
    }

    #[test]
    fn int_arithmetic_stays_int() {
        assert_eq!(eval(&bin(BinOp::Add, num(2.0), num(3.0))), ConstValue::Int(5));
        assert_eq!(eval(&bin(BinOp::Mul, num(4.0), num(5.0))), ConstValue::Int(20));
        assert_eq!(eval(&bin(BinOp::Mod, num(7.0), num(3.0))), ConstValue::Int(1));
    }

    #[test]
    fn division_and_power_promote() {
        assert_eq!(eval(&bin(BinOp::Div, num(7.0), num(2.0))), ConstValue::Num(3.5));
        assert_eq!(eval(&bin(BinOp::Pow, num(2.0), num(10.0))), ConstValue::Num(1024.0));
    }

    #[test]
    fn bitwise_ops() {
        assert_eq!(eval(&bin(BinOp::And, num(6.0), num(3.0))), ConstValue::Int(2));
        assert_eq!(eval(&bin(BinOp::Or, num(4.0), num(1.0))), ConstValue::Int(5));
        assert_eq!(eval(&bin(BinOp::Xor, num(7.0), num(2.0))), ConstValue::Int(5));
    }

    #[test]
    fn string_functions() {
        let s = Expr::string("HELLO", SourceLocation::default());
        let call = Expr::new(
            ExprKind::ArrayAccess { name: "LEFT$".to_string(), indices: vec![s, num(2.0)] },
            SourceLocation::default(),
        );
        assert_eq!(eval(&call), ConstValue::Str("HE".to_string()));
    }

    #[test]
    fn val_swallows_parse_failures() {
        let s = Expr::string("junk", SourceLocation::default());
        let call = Expr::new(
            ExprKind::ArrayAccess { name: "VAL".to_string(), indices: vec![s] },
            SourceLocation::default(),
        );
        let symbols = SymbolTable::new();
        let mut notes = Vec::new();
        let v = evaluate_const_expr(&call, &symbols, &mut notes).unwrap();
        assert_eq!(v, ConstValue::Num(0.0));
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, "VAL_PARSE");
    }

    #[test]
    fn division_by_zero_is_reported() {
        let e = bin(BinOp::IntDiv, num(1.0), num(0.0));
        let symbols = SymbolTable::new();
        let mut notes = Vec::new();
        assert!(evaluate_const_expr(&e, &symbols, &mut notes).is_err());
    }
}
