//! Canonical value formatting for variable building.
//!
//! Every path that turns billing amounts or payload scalars into string
//! variables goes through here, so rounding and trailing-zero behavior stay
//! uniform.

use crate::dsl::ParamValue;

/// Formats a minor-unit amount as a decimal string: `1234` → `"12.34"`,
/// `1230` → `"12.3"`, `1200` → `"12"`. Sign is preserved.
pub fn minor_units_to_decimal(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / 100;
    let cents = abs % 100;

    if cents == 0 {
        format!("{sign}{whole}")
    } else if cents % 10 == 0 {
        format!("{sign}{whole}.{}", cents / 10)
    } else {
        format!("{sign}{whole}.{cents:02}")
    }
}

/// Minor-unit amount plus an uppercased currency suffix when one is known.
pub fn money(amount: i64, currency: &str) -> String {
    let decimal = minor_units_to_decimal(amount);
    if currency.is_empty() {
        decimal
    } else {
        format!("{decimal} {}", currency.to_uppercase())
    }
}

/// Renders a JSON number without a spurious decimal point: integral values
/// print as integers, fractional values drop trailing zeros.
pub fn number_to_string(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f == f.trunc() && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => {
            let s = format!("{f}");
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        None => n.to_string(),
    }
}

/// Stringifies a scalar payload value. Returns `None` for nulls and for
/// composite values, which never become variables directly.
pub fn scalar_to_string(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::String(s) => Some(s.clone()),
        ParamValue::Number(n) => Some(number_to_string(n)),
        ParamValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        ParamValue::Null | ParamValue::Array(_) | ParamValue::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_trim_trailing_zeros() {
        assert_eq!(minor_units_to_decimal(1234), "12.34");
        assert_eq!(minor_units_to_decimal(1230), "12.3");
        assert_eq!(minor_units_to_decimal(1200), "12");
        assert_eq!(minor_units_to_decimal(5), "0.05");
        assert_eq!(minor_units_to_decimal(0), "0");
        assert_eq!(minor_units_to_decimal(-150), "-1.5");
    }

    #[test]
    fn money_appends_uppercased_currency() {
        assert_eq!(money(9990, "usd"), "99.9 USD");
        assert_eq!(money(100, ""), "1");
    }

    #[test]
    fn numbers_render_without_spurious_decimals() {
        let n: serde_json::Number = serde_json::from_str("42").unwrap();
        assert_eq!(number_to_string(&n), "42");
        let n: serde_json::Number = serde_json::from_str("42.5").unwrap();
        assert_eq!(number_to_string(&n), "42.5");
        let n: serde_json::Number = serde_json::from_str("42.0").unwrap();
        assert_eq!(number_to_string(&n), "42");
    }

    #[test]
    fn scalars_stringify_and_composites_do_not() {
        assert_eq!(scalar_to_string(&ParamValue::Bool(true)), Some("true".into()));
        assert_eq!(scalar_to_string(&ParamValue::Null), None);
        assert_eq!(scalar_to_string(&ParamValue::Array(vec![])), None);
    }
}
