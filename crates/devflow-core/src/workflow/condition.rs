//! Boolean condition evaluation over a [`VariableScope`].
//!
//! The grammar is intentionally tiny. After `$path` substitution a condition
//! is one of:
//! - empty (vacuously true)
//! - the literal `true` or `false`
//! - `left OP right` with `==`, `!=`, `>=`, `<=`, `>`, `<`
//! - anything else, tested for truthiness
//!
//! Comparisons are numeric when both operands parse as numbers. Otherwise
//! `==`/`!=` compare strings and ordering operators are an error.

use thiserror::Error;

use super::context::VariableScope;

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("operator '{op}' needs numeric operands, got '{left}' and '{right}'")]
    NonNumericOrdering {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("missing operand in '{0}'")]
    MissingOperand(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
        }
    }
}

// Two-character operators first so ">=" is never read as ">".
const OPERATORS: [Operator; 6] = [
    Operator::Eq,
    Operator::Ne,
    Operator::Ge,
    Operator::Le,
    Operator::Gt,
    Operator::Lt,
];

/// Evaluate `expression` against `scope`.
pub fn evaluate(expression: &str, scope: &VariableScope) -> Result<bool, ConditionError> {
    let resolved = scope.resolve_str(expression);
    evaluate_resolved(resolved.trim())
}

/// Evaluate, treating any evaluation error as `false`.
pub fn evaluate_or_false(expression: &str, scope: &VariableScope) -> bool {
    match evaluate(expression, scope) {
        Ok(result) => result,
        Err(err) => {
            tracing::debug!(expression, error = %err, "condition evaluation failed, treating as false");
            false
        }
    }
}

/// Finite numbers only; `inf` and `NaN` compare as strings.
fn as_number(operand: &str) -> Option<f64> {
    operand.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn evaluate_resolved(expr: &str) -> Result<bool, ConditionError> {
    match expr {
        "" | "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    let Some((pos, op)) = find_operator(expr) else {
        return Ok(is_truthy(expr));
    };

    let left = unquote(expr[..pos].trim());
    let right = unquote(expr[pos + op.symbol().len()..].trim());
    if left.is_empty() && right.is_empty() {
        return Err(ConditionError::MissingOperand(expr.to_string()));
    }

    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return Ok(match op {
            Operator::Eq => l == r,
            Operator::Ne => l != r,
            Operator::Ge => l >= r,
            Operator::Le => l <= r,
            Operator::Gt => l > r,
            Operator::Lt => l < r,
        });
    }

    match op {
        Operator::Eq => Ok(left == right),
        Operator::Ne => Ok(left != right),
        _ => Err(ConditionError::NonNumericOrdering {
            op: op.symbol(),
            left: left.to_string(),
            right: right.to_string(),
        }),
    }
}

/// Leftmost operator occurrence; at equal positions the longer operator wins.
fn find_operator(expr: &str) -> Option<(usize, Operator)> {
    OPERATORS
        .iter()
        .filter_map(|op| expr.find(op.symbol()).map(|pos| (pos, *op)))
        .min_by_key(|(pos, op)| (*pos, std::cmp::Reverse(op.symbol().len())))
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "0" | "false" | "null" | "undefined")
}
