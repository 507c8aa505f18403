//! Condition expression checking.
//!
//! Grammar accepted:
//!
//! ```text
//! expr  := term (("and" | "or") term)*
//! term  := "not" term | "(" expr ")" | quant "of" target | IDENT
//! quant := "1" | "all" | "any"
//! target:= "them" | IDENT (may contain '*' wildcards)
//! ```
//!
//! Every identifier must name a declared selection; wildcard targets must
//! match at least one.

use std::collections::BTreeSet;
use std::fmt;

use super::fuzzy::fuzzy_match;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Of,
    Them,
    Quantifier(String),
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::Of => f.write_str("of"),
            Token::Them => f.write_str("them"),
            Token::Quantifier(q) | Token::Ident(q) => f.write_str(q),
        }
    }
}

/// A problem found in a condition expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConditionError {
    pub message: String,
    pub suggestion: Option<String>,
}

impl ConditionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let token = match word.to_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "of" => Token::Of,
            "them" => Token::Them,
            "1" | "all" | "any" => Token::Quantifier(word.to_lowercase()),
            _ => Token::Ident(word.clone()),
        };
        tokens.push(token);
        word.clear();
    };

    for ch in expr.chars() {
        match ch {
            '(' | ')' => {
                flush(&mut word, &mut tokens);
                tokens.push(if ch == '(' { Token::LParen } else { Token::RParen });
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c if c.is_alphanumeric() || matches!(c, '_' | '-' | '*' | '.') => word.push(c),
            other => {
                return Err(ConditionError::new(format!(
                    "unexpected character '{other}' in condition"
                )))
            }
        }
    }
    flush(&mut word, &mut tokens);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    selections: &'a [&'a str],
    referenced: BTreeSet<String>,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self) -> Result<(), ConditionError> {
        self.parse_term()?;
        while matches!(self.peek(), Some(Token::And | Token::Or)) {
            self.pos += 1;
            self.parse_term()?;
        }
        Ok(())
    }

    fn parse_term(&mut self) -> Result<(), ConditionError> {
        match self.next() {
            None => Err(ConditionError::new(
                "condition ends where a selection was expected",
            )),
            Some(Token::Not) => self.parse_term(),
            Some(Token::LParen) => {
                self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(()),
                    _ => Err(ConditionError::new("unbalanced parentheses: missing ')'")),
                }
            }
            Some(Token::Quantifier(q)) => {
                if self.next() != Some(Token::Of) {
                    return Err(ConditionError::new(format!("expected 'of' after '{q}'")));
                }
                match self.next() {
                    Some(Token::Them) => {
                        self.referenced
                            .extend(self.selections.iter().map(|s| s.to_string()));
                        Ok(())
                    }
                    Some(Token::Ident(target)) => self.resolve(&target),
                    Some(other) => Err(ConditionError::new(format!(
                        "expected a selection name or 'them' after '{q} of', found '{other}'"
                    ))),
                    None => Err(ConditionError::new(format!(
                        "expected a selection name or 'them' after '{q} of'"
                    ))),
                }
            }
            Some(Token::Ident(name)) => self.resolve(&name),
            Some(Token::RParen) => Err(ConditionError::new("unbalanced parentheses: unexpected ')'")),
            Some(other) => Err(ConditionError::new(format!(
                "unexpected '{other}' where a selection was expected"
            ))),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<(), ConditionError> {
        let matched: Vec<&str> = self
            .selections
            .iter()
            .copied()
            .filter(|s| glob_match(name, s))
            .collect();
        if matched.is_empty() {
            let what = if name.contains('*') { "pattern" } else { "selection" };
            return Err(ConditionError {
                message: format!("condition references undefined {what} '{name}'"),
                suggestion: fuzzy_match(name, self.selections).map(str::to_string),
            });
        }
        self.referenced.extend(matched.into_iter().map(str::to_string));
        Ok(())
    }
}

/// Check `expr` against the declared selection names. Returns the set of
/// selections the expression references.
pub(crate) fn check_condition(
    expr: &str,
    selections: &[&str],
) -> Result<BTreeSet<String>, ConditionError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ConditionError::new("condition is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        selections,
        referenced: BTreeSet::new(),
    };
    parser.parse_expr()?;
    match parser.peek() {
        None => Ok(parser.referenced),
        Some(Token::RParen) => Err(ConditionError::new("unbalanced parentheses: unexpected ')'")),
        Some(tok) => Err(ConditionError::new(format!(
            "expected 'and' or 'or' before '{tok}'"
        ))),
    }
}

/// `*` matches any run of characters; everything else is literal.
fn glob_match(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}
