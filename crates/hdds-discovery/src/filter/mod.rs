// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Content-filtered subscriptions.
//!
//! A subscription announces a [`ContentFilterProperty`] through SEDP. The
//! matched writer compiles it once and evaluates samples against the current
//! parameters; parameter updates reach the writer without a re-match.
//!
//! # Supported Syntax
//!
//! ```text
//! expression ::= predicate | expression (AND | OR) expression
//!              | NOT expression | '(' expression ')'
//! predicate  ::= operand op operand
//!              | operand [NOT] BETWEEN operand AND operand
//! op         ::= '>' | '<' | '>=' | '<=' | '=' | '<>' | '!=' | LIKE
//! operand    ::= field | '%' digit+ | integer | float | 'string'
//! ```

mod evaluator;
mod parser;

pub use evaluator::{evaluate, FieldValue};
pub use parser::{parse_expression, Expression, Operand, Operator};

use std::collections::HashMap;
use std::sync::Arc;

/// Filter class understood by [`ContentFilter`].
pub const DDSSQL_FILTER_CLASS: &str = "DDSSQL";

/// Filter description carried in a subscription announcement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentFilterProperty {
    /// Name of the content-filtered topic.
    pub content_filtered_topic_name: String,
    /// Topic the filter applies to.
    pub related_topic_name: String,
    /// Filter class; empty means the default SQL class.
    pub filter_class_name: String,
    pub filter_expression: String,
    pub expression_parameters: Vec<String>,
}

impl ContentFilterProperty {
    /// SQL filter on `related_topic_name`.
    pub fn sql(
        content_filtered_topic_name: impl Into<String>,
        related_topic_name: impl Into<String>,
        filter_expression: impl Into<String>,
        expression_parameters: Vec<String>,
    ) -> Self {
        Self {
            content_filtered_topic_name: content_filtered_topic_name.into(),
            related_topic_name: related_topic_name.into(),
            filter_class_name: DDSSQL_FILTER_CLASS.to_string(),
            filter_expression: filter_expression.into(),
            expression_parameters,
        }
    }

    /// Class name with the empty default resolved.
    pub fn effective_class(&self) -> &str {
        if self.filter_class_name.is_empty() {
            DDSSQL_FILTER_CLASS
        } else {
            &self.filter_class_name
        }
    }

    /// Compile the expression for evaluation. Every `%N` it references
    /// must have a parameter.
    pub fn compile(&self) -> Result<ContentFilter, FilterError> {
        if self.effective_class() != DDSSQL_FILTER_CLASS {
            return Err(FilterError::UnsupportedClass(self.filter_class_name.clone()));
        }
        let filter = ContentFilter::new(&self.filter_expression, self.expression_parameters.clone())?;
        match filter.expression.max_param_index() {
            Some(idx) if idx >= self.expression_parameters.len() => {
                Err(FilterError::ParameterOutOfRange(idx))
            }
            _ => Ok(filter),
        }
    }
}

/// Compiled filter plus its current parameters.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    expression: Arc<Expression>,
    parameters: Vec<String>,
}

impl ContentFilter {
    pub fn new(expression: &str, parameters: Vec<String>) -> Result<Self, FilterError> {
        let parsed = parse_expression(expression)?;
        Ok(Self {
            expression: Arc::new(parsed),
            parameters,
        })
    }

    /// Replace parameters; the parsed expression is kept.
    pub fn set_parameters(&mut self, parameters: Vec<String>) {
        self.parameters = parameters;
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// True if the sample passes the filter.
    pub fn matches(&self, fields: &HashMap<String, FieldValue>) -> Result<bool, FilterError> {
        evaluate(&self.expression, fields, &self.parameters)
    }
}

/// Errors that can occur during filter operations.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Invalid filter expression syntax.
    Parse(String),
    /// Unknown field name in expression.
    UnknownField(String),
    /// Parameter index out of range.
    ParameterOutOfRange(usize),
    /// Operands cannot be compared.
    TypeMismatch(String),
    /// Empty expression.
    EmptyExpression,
    /// Filter class other than DDSSQL.
    UnsupportedClass(String),
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::Parse(msg) => write!(f, "Filter parse error: {}", msg),
            FilterError::UnknownField(name) => write!(f, "Unknown field: {}", name),
            FilterError::ParameterOutOfRange(idx) => write!(f, "Parameter %{} not provided", idx),
            FilterError::TypeMismatch(msg) => write!(f, "Type mismatch: {}", msg),
            FilterError::EmptyExpression => write!(f, "Empty filter expression"),
            FilterError::UnsupportedClass(name) => write!(f, "Unsupported filter class: {}", name),
        }
    }
}

impl std::error::Error for FilterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_compile_and_update() {
        let prop = ContentFilterProperty::sql("cft", "T", "key > %0", vec!["10".to_string()]);
        let mut filter = prop.compile().unwrap();
        let sample: HashMap<String, FieldValue> =
            [("key".to_string(), FieldValue::from(15))].into_iter().collect();

        assert!(filter.matches(&sample).unwrap());
        filter.set_parameters(vec!["20".to_string()]);
        assert!(!filter.matches(&sample).unwrap());
    }

    #[test]
    fn test_missing_parameter_rejected() {
        let mut prop = ContentFilterProperty::sql("cft", "T", "x BETWEEN %0 AND %1", vec!["1".to_string()]);
        assert_eq!(prop.compile().err(), Some(FilterError::ParameterOutOfRange(1)));
        prop.expression_parameters.push("5".to_string());
        assert!(prop.compile().is_ok());
    }

    #[test]
    fn test_unknown_class_rejected() {
        let mut prop = ContentFilterProperty::sql("cft", "T", "x > 1", Vec::new());
        prop.filter_class_name = "REGEX".to_string();
        assert_eq!(
            prop.compile().err(),
            Some(FilterError::UnsupportedClass("REGEX".to_string()))
        );
    }

    #[test]
    fn test_empty_class_defaults_to_sql() {
        let prop = ContentFilterProperty {
            filter_expression: "x = 1".to_string(),
            ..ContentFilterProperty::default()
        };
        assert_eq!(prop.effective_class(), DDSSQL_FILTER_CLASS);
        assert!(prop.compile().is_ok());
    }
}
