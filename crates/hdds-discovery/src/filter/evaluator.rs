// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Evaluation of parsed filter expressions against sample fields.

use super::parser::{Expression, Operand, Operator};
use super::FilterError;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Runtime value of a sample field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Unsigned(u64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Unsigned(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Parameters arrive as strings; numbers win over text.
fn param_value(raw: &str) -> FieldValue {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        FieldValue::Integer(n)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        FieldValue::Float(f)
    } else if trimmed.eq_ignore_ascii_case("true") {
        FieldValue::Boolean(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        FieldValue::Boolean(false)
    } else {
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap_or(raw);
        FieldValue::Text(unquoted.to_string())
    }
}

fn resolve(
    operand: &Operand,
    fields: &HashMap<String, FieldValue>,
    params: &[String],
) -> Result<FieldValue, FilterError> {
    match operand {
        Operand::Integer(n) => Ok(FieldValue::Integer(*n)),
        Operand::Float(f) => Ok(FieldValue::Float(*f)),
        Operand::Text(s) => Ok(FieldValue::Text(s.clone())),
        Operand::Param(i) => params
            .get(*i)
            .map(|raw| param_value(raw))
            .ok_or(FilterError::ParameterOutOfRange(*i)),
        Operand::Field(name) => fields
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::UnknownField(name.clone())),
    }
}

fn order(left: &FieldValue, right: &FieldValue) -> Result<Ordering, FilterError> {
    use FieldValue::*;
    let numeric = |v: &FieldValue| -> Option<f64> {
        match v {
            Integer(n) => Some(*n as f64),
            Unsigned(n) => Some(*n as f64),
            Float(f) => Some(*f),
            _ => None,
        }
    };

    match (left, right) {
        (Integer(a), Integer(b)) => Ok(a.cmp(b)),
        (Unsigned(a), Unsigned(b)) => Ok(a.cmp(b)),
        (Integer(a), Unsigned(b)) => Ok(i128::from(*a).cmp(&i128::from(*b))),
        (Unsigned(a), Integer(b)) => Ok(i128::from(*a).cmp(&i128::from(*b))),
        (Text(a), Text(b)) => Ok(a.cmp(b)),
        (Boolean(a), Boolean(b)) => Ok(a.cmp(b)),
        _ => match (numeric(left), numeric(right)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| FilterError::TypeMismatch("NaN comparison".to_string())),
            _ => Err(FilterError::TypeMismatch(format!(
                "cannot compare {:?} with {:?}",
                left, right
            ))),
        },
    }
}

/// SQL LIKE: `%` any run, `_` one character.
fn like(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like(&text[1..], rest),
    }
}

/// Evaluate `expr` for one sample.
pub fn evaluate(
    expr: &Expression,
    fields: &HashMap<String, FieldValue>,
    params: &[String],
) -> Result<bool, FilterError> {
    match expr {
        Expression::And(a, b) => Ok(evaluate(a, fields, params)? && evaluate(b, fields, params)?),
        Expression::Or(a, b) => Ok(evaluate(a, fields, params)? || evaluate(b, fields, params)?),
        Expression::Not(inner) => Ok(!evaluate(inner, fields, params)?),
        Expression::Between {
            field,
            low,
            high,
            negated,
        } => {
            let value = resolve(field, fields, params)?;
            let inside = order(&value, &resolve(low, fields, params)?)? != Ordering::Less
                && order(&value, &resolve(high, fields, params)?)? != Ordering::Greater;
            Ok(inside != *negated)
        }
        Expression::Compare { left, op, right } => {
            let l = resolve(left, fields, params)?;
            let r = resolve(right, fields, params)?;
            if *op == Operator::Like {
                return match (&l, &r) {
                    (FieldValue::Text(t), FieldValue::Text(p)) => {
                        let t: Vec<char> = t.chars().collect();
                        let p: Vec<char> = p.chars().collect();
                        Ok(like(&t, &p))
                    }
                    _ => Err(FilterError::TypeMismatch(
                        "LIKE requires text operands".to_string(),
                    )),
                };
            }
            let ordering = order(&l, &r)?;
            Ok(match op {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Ge => ordering != Ordering::Less,
                Operator::Le => ordering != Ordering::Greater,
                Operator::Eq => ordering == Ordering::Equal,
                Operator::Ne => ordering != Ordering::Equal,
                Operator::Like => false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse_expression;
    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> HashMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parameter_threshold() {
        let expr = parse_expression("key > %0").unwrap();
        let sample = fields(&[("key", FieldValue::from(7))]);
        assert!(evaluate(&expr, &sample, &["5".to_string()]).unwrap());
        assert!(!evaluate(&expr, &sample, &["10".to_string()]).unwrap());
    }

    #[test]
    fn test_mixed_numeric_kinds() {
        let expr = parse_expression("id >= 2.5").unwrap();
        assert!(evaluate(&expr, &fields(&[("id", FieldValue::from(3u32))]), &[]).unwrap());
        assert!(!evaluate(&expr, &fields(&[("id", FieldValue::from(2u32))]), &[]).unwrap());
    }

    #[test]
    fn test_like_and_between() {
        let sample = fields(&[
            ("name", FieldValue::from("sensor_42")),
            ("v", FieldValue::from(3)),
        ]);
        let like_expr = parse_expression("name LIKE 'sensor_%'").unwrap();
        assert!(evaluate(&like_expr, &sample, &[]).unwrap());

        let between = parse_expression("v BETWEEN %0 AND %1").unwrap();
        assert!(evaluate(&between, &sample, &["1".to_string(), "3".to_string()]).unwrap());
        assert!(!evaluate(&between, &sample, &["4".to_string(), "9".to_string()]).unwrap());
    }

    #[test]
    fn test_missing_param_and_field() {
        let expr = parse_expression("key > %1").unwrap();
        let sample = fields(&[("key", FieldValue::from(1))]);
        assert_eq!(
            evaluate(&expr, &sample, &["0".to_string()]),
            Err(FilterError::ParameterOutOfRange(1))
        );

        let expr = parse_expression("other = 1").unwrap();
        assert!(matches!(
            evaluate(&expr, &sample, &[]),
            Err(FilterError::UnknownField(_))
        ));
    }

    #[test]
    fn test_text_param_unquoted() {
        let expr = parse_expression("name = %0").unwrap();
        let sample = fields(&[("name", FieldValue::from("x"))]);
        assert!(evaluate(&expr, &sample, &["'x'".to_string()]).unwrap());
    }
}
