//! Boolean tag expressions used to select cases.
//!
//! `smoke and not (slow or flaky)`: `or` binds loosest, then `and`, then
//! unary `not`. Keywords and tags compare case-insensitively.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagParseError {
    #[error("unexpected '{0}' in tag expression")]
    UnexpectedToken(String),
    #[error("tag expression ended early")]
    UnexpectedEnd,
    #[error("unbalanced parentheses in tag expression")]
    Unbalanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Tag(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Open => "(".into(),
            Token::Close => ")".into(),
            Token::And => "and".into(),
            Token::Or => "or".into(),
            Token::Not => "not".into(),
            Token::Tag(tag) => tag.clone(),
        }
    }
}

fn tokenize(expr: &str) -> Vec<Token> {
    static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\(|\)|[^()\s]+").expect("failed to compile tag token regex")
    });

    TOKEN_RE
        .find_iter(expr)
        .map(|m| match m.as_str().to_lowercase().as_str() {
            "(" => Token::Open,
            ")" => Token::Close,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            other => Token::Tag(other.to_string()),
        })
        .collect()
}

/// Parsed tag expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    /// Parse an expression. Blank input yields `None` (select everything).
    pub fn parse(expr: &str) -> Result<Option<Self>, TagParseError> {
        let tokens = tokenize(expr);
        if tokens.is_empty() {
            return Ok(None);
        }
        let mut parser = TagParser { tokens, pos: 0 };
        let parsed = parser.or()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(Some(parsed)),
            Some(Token::Close) => Err(TagParseError::Unbalanced),
            Some(token) => Err(TagParseError::UnexpectedToken(token.text())),
        }
    }

    /// Evaluate against lowercase tags.
    pub fn evaluate(&self, tags: &HashSet<String>) -> bool {
        match self {
            TagExpr::Tag(tag) => tags.contains(tag),
            TagExpr::Not(inner) => !inner.evaluate(tags),
            TagExpr::And(lhs, rhs) => lhs.evaluate(tags) && rhs.evaluate(tags),
            TagExpr::Or(lhs, rhs) => lhs.evaluate(tags) || rhs.evaluate(tags),
        }
    }
}

struct TagParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TagParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<TagExpr, TagParseError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = TagExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<TagExpr, TagParseError> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            let rhs = self.not()?;
            lhs = TagExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<TagExpr, TagParseError> {
        if self.eat(&Token::Not) {
            return Ok(TagExpr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<TagExpr, TagParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(TagParseError::UnexpectedEnd);
        };
        self.pos += 1;
        match token {
            Token::Open => {
                let inner = self.or()?;
                if !self.eat(&Token::Close) {
                    return Err(TagParseError::Unbalanced);
                }
                Ok(inner)
            }
            Token::Tag(tag) => Ok(TagExpr::Tag(tag)),
            other => Err(TagParseError::UnexpectedToken(other.text())),
        }
    }
}

/// `true` when `tags` satisfy `expression`. A blank or missing expression
/// selects everything; a malformed one selects nothing.
pub fn matches<I, S>(tags: I, expression: Option<&str>) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let Some(expression) = expression else {
        return true;
    };
    match TagExpr::parse(expression) {
        Ok(None) => true,
        Ok(Some(expr)) => {
            let tags: HashSet<String> = tags
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect();
            expr.evaluate(&tags)
        }
        Err(_) => false,
    }
}
