//! Boolean condition language used by `condition` steps.
//!
//! Precedence, loosest first: `||`, `&&`, unary `!`, parentheses, string
//! functions (`contains`, `starts_with`, `ends_with`), comparisons
//! (`!=`, `>=`, `<=`, `==`, `>`, `<`), and finally a bare truthy check.
//! Ordering comparisons are numeric when both operands parse as numbers,
//! lexicographic otherwise. Deterministic and side-effect free.

use crate::template::{self, RenderMode};
use crate::types::VarMap;

/// Substitutes `{{var}}` placeholders, then evaluates the expression.
pub fn eval_condition(expr: &str, vars: &VarMap) -> bool {
    let rendered = template::render(expr, vars, RenderMode::KeepMissing);
    eval_expression(&rendered)
}

fn eval_expression(expr: &str) -> bool {
    let expr = expr.trim();

    // || binds loosest.
    if let Some(parts) = split_logical(expr, "||") {
        return parts.iter().any(|part| eval_expression(part));
    }

    if let Some(parts) = split_logical(expr, "&&") {
        return parts.iter().all(|part| eval_expression(part));
    }

    if let Some(rest) = expr.strip_prefix('!') {
        return !eval_expression(rest);
    }

    if expr.starts_with('(') && expr.ends_with(')') {
        return eval_expression(&expr[1..expr.len() - 1]);
    }

    if let Some(result) = eval_string_func(expr) {
        return result;
    }

    eval_comparison(expr)
}

/// Splits on a logical operator at parenthesis depth zero. Returns `None`
/// when the operator does not occur at the top level.
fn split_logical<'a>(expr: &'a str, op: &str) -> Option<Vec<&'a str>> {
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && bytes[i..].starts_with(op_bytes) {
            parts.push(&expr[start..i]);
            start = i + op_bytes.len();
            i += op_bytes.len();
            continue;
        }
        i += 1;
    }

    if parts.is_empty() {
        return None;
    }
    parts.push(&expr[start..]);
    Some(parts)
}

fn eval_string_func(expr: &str) -> Option<bool> {
    let expr = expr.trim();
    for func in ["contains", "starts_with", "ends_with"] {
        let Some(inner) = expr
            .strip_prefix(func)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
        else {
            continue;
        };

        let args = split_func_args(inner);
        if args.len() != 2 {
            return Some(false);
        }
        let a = strip_quotes(args[0].trim());
        let b = strip_quotes(args[1].trim());

        return Some(match func {
            "contains" => a.contains(b),
            "starts_with" => a.starts_with(b),
            _ => a.ends_with(b),
        });
    }
    None
}

/// Splits function arguments on commas, respecting nested parentheses and
/// quote characters.
fn split_func_args(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = 0u8;
    let mut start = 0;

    for (i, &ch) in bytes.iter().enumerate() {
        if in_quote != 0 {
            if ch == in_quote {
                in_quote = 0;
            }
            continue;
        }
        match ch {
            b'\'' | b'"' => in_quote = ch,
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(&s[start..]);
    args
}

fn eval_comparison(expr: &str) -> bool {
    for op in ["!=", ">=", "<=", "==", ">", "<"] {
        if let Some((left, right)) = expr.split_once(op) {
            let left = strip_quotes(left.trim());
            let right = strip_quotes(right.trim());
            return match op {
                "==" => left == right,
                "!=" => left != right,
                ordered => compare_numeric_or_string(left, right, ordered),
            };
        }
    }

    // No operator: bare truthy check.
    let expr = expr.trim();
    !expr.is_empty() && expr != "false" && expr != "0" && expr != "null"
}

/// Numeric comparison when both sides parse as numbers, lexicographic
/// otherwise.
fn compare_numeric_or_string(left: &str, right: &str, op: &str) -> bool {
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match op {
            ">" => l > r,
            "<" => l < r,
            ">=" => l >= r,
            _ => l <= r,
        };
    }
    match op {
        ">" => left > right,
        "<" => left < right,
        ">=" => left >= right,
        _ => left <= right,
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}
