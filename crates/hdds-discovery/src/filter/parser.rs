// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Filter expression tokenizer and recursive-descent parser.

use super::FilterError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Like,
}

/// Operand of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Integer(i64),
    Float(f64),
    Text(String),
    /// `%N` parameter reference.
    Param(usize),
    /// Field name (dotted paths kept verbatim).
    Field(String),
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Compare {
        left: Operand,
        op: Operator,
        right: Operand,
    },
    /// `field BETWEEN low AND high` (inclusive).
    Between {
        field: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Highest `%N` index referenced, if any.
    pub fn max_param_index(&self) -> Option<usize> {
        fn operand(o: &Operand) -> Option<usize> {
            match o {
                Operand::Param(i) => Some(*i),
                _ => None,
            }
        }
        match self {
            Expression::Compare { left, right, .. } => operand(left).max(operand(right)),
            Expression::Between {
                field, low, high, ..
            } => operand(field).max(operand(low)).max(operand(high)),
            Expression::And(a, b) | Expression::Or(a, b) => {
                a.max_param_index().max(b.max_param_index())
            }
            Expression::Not(inner) => inner.max_param_index(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Integer(i64),
    Float(f64),
    Text(String),
    Param(usize),
    Op(Operator),
    And,
    Or,
    Not,
    Between,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match (c, next) {
            ('>', Some('=')) => (Token::Op(Operator::Ge), 2),
            ('<', Some('=')) => (Token::Op(Operator::Le), 2),
            ('<', Some('>')) | ('!', Some('=')) => (Token::Op(Operator::Ne), 2),
            ('=', Some('=')) => (Token::Op(Operator::Eq), 2),
            ('>', _) => (Token::Op(Operator::Gt), 1),
            ('<', _) => (Token::Op(Operator::Lt), 1),
            ('=', _) => (Token::Op(Operator::Eq), 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('%', _) => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|ch| ch.is_ascii_digit())
                    .collect();
                if digits.is_empty() {
                    return Err(FilterError::Parse("expected digit after '%'".to_string()));
                }
                let index = digits
                    .parse()
                    .map_err(|_| FilterError::Parse(format!("bad parameter %{}", digits)))?;
                (Token::Param(index), 1 + digits.len())
            }
            ('\'', _) | ('"', _) | ('`', _) => {
                let close = if c == '`' { '\'' } else { c };
                let body: String = chars[i + 1..].iter().take_while(|&&ch| ch != close).collect();
                let end = i + 1 + body.chars().count();
                if end >= chars.len() {
                    return Err(FilterError::Parse("unterminated string".to_string()));
                }
                (Token::Text(body), end + 1 - i)
            }
            _ if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = i + 1;
                let mut dot = false;
                while end < chars.len() && (chars[end].is_ascii_digit() || (chars[end] == '.' && !dot)) {
                    dot |= chars[end] == '.';
                    end += 1;
                }
                let text: String = chars[i..end].iter().collect();
                let token = if dot {
                    Token::Float(
                        text.parse()
                            .map_err(|_| FilterError::Parse(format!("bad number {}", text)))?,
                    )
                } else {
                    Token::Integer(
                        text.parse()
                            .map_err(|_| FilterError::Parse(format!("bad number {}", text)))?,
                    )
                };
                (token, end - i)
            }
            _ if c.is_alphabetic() || c == '_' => {
                let word: String = chars[i..]
                    .iter()
                    .take_while(|ch| ch.is_alphanumeric() || **ch == '_' || **ch == '.')
                    .collect();
                let width = word.chars().count();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "BETWEEN" => Token::Between,
                    "LIKE" => Token::Op(Operator::Like),
                    "TRUE" => Token::Integer(1),
                    "FALSE" => Token::Integer(0),
                    _ => Token::Ident(word),
                };
                (token, width)
            }
            _ => return Err(FilterError::Parse(format!("unexpected character '{}'", c))),
        };

        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expression, FilterError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            left = Expression::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expression, FilterError> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            left = Expression::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, FilterError> {
        if self.eat(&Token::Not) {
            return Ok(Expression::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.or_expr()?;
            if !self.eat(&Token::RParen) {
                return Err(FilterError::Parse("expected ')'".to_string()));
            }
            return Ok(inner);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expression, FilterError> {
        let left = self.operand()?;

        let negated = self.eat(&Token::Not);
        if self.eat(&Token::Between) {
            let low = self.operand()?;
            if !self.eat(&Token::And) {
                return Err(FilterError::Parse("expected AND in BETWEEN".to_string()));
            }
            let high = self.operand()?;
            return Ok(Expression::Between {
                field: left,
                low,
                high,
                negated,
            });
        }
        if negated {
            return Err(FilterError::Parse("expected BETWEEN after NOT".to_string()));
        }

        let op = match self.bump() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(FilterError::Parse(format!(
                    "expected operator, got {:?}",
                    other
                )))
            }
        };
        let right = self.operand()?;
        Ok(Expression::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, FilterError> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(Operand::Field(name)),
            Some(Token::Integer(n)) => Ok(Operand::Integer(n)),
            Some(Token::Float(f)) => Ok(Operand::Float(f)),
            Some(Token::Text(s)) => Ok(Operand::Text(s)),
            Some(Token::Param(i)) => Ok(Operand::Param(i)),
            other => Err(FilterError::Parse(format!(
                "expected operand, got {:?}",
                other
            ))),
        }
    }
}

/// Parse a filter expression.
pub fn parse_expression(expression: &str) -> Result<Expression, FilterError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(FilterError::EmptyExpression);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if let Some(extra) = parser.peek() {
        return Err(FilterError::Parse(format!("trailing token {:?}", extra)));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter_comparison() {
        let expr = parse_expression("key > %0").unwrap();
        assert_eq!(
            expr,
            Expression::Compare {
                left: Operand::Field("key".to_string()),
                op: Operator::Gt,
                right: Operand::Param(0),
            }
        );
        assert_eq!(expr.max_param_index(), Some(0));
    }

    #[test]
    fn test_precedence_and_over_or() {
        let expr = parse_expression("a > 1 AND b < %1 OR c = 'x'").unwrap();
        assert!(matches!(expr, Expression::Or(_, _)));
        assert_eq!(expr.max_param_index(), Some(1));
    }

    #[test]
    fn test_between_and_not() {
        let expr = parse_expression("NOT (x NOT BETWEEN 1 AND 5)").unwrap();
        match expr {
            Expression::Not(inner) => {
                assert!(matches!(*inner, Expression::Between { negated: true, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_all_operators() {
        for op in [">", "<", ">=", "<=", "=", "==", "<>", "!=", "LIKE"] {
            assert!(parse_expression(&format!("x {} 1", op)).is_ok(), "{}", op);
        }
    }

    #[test]
    fn test_dotted_field_and_float() {
        let expr = parse_expression("pos.x >= -2.5").unwrap();
        assert_eq!(
            expr,
            Expression::Compare {
                left: Operand::Field("pos.x".to_string()),
                op: Operator::Ge,
                right: Operand::Float(-2.5),
            }
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_expression("  "), Err(FilterError::EmptyExpression));
        assert!(parse_expression("x >").is_err());
        assert!(parse_expression("x > 'open").is_err());
        assert!(parse_expression("x > 1 )").is_err());
        assert!(parse_expression("@@").is_err());
    }
}
