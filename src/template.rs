//! Template rendering for request fields, variables and expected values.
//!
//! Supported forms:
//!
//! - `$name` / `${name}`: variable lookup
//! - `${fn(arg, ...)}`: function call; arguments may be literals,
//!   variables, or further calls (`${f($x, g(1))}`)
//! - `$$`: a literal `$`
//!
//! A string that is exactly one expression evaluates to the expression's
//! native value, so `"${gen_id()}"` stays an integer. Anything mixed with
//! surrounding text is interpolated and always yields a string.

use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::model::Scope;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Variable(String),
    Call { name: String, args: Vec<Expr> },
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        Parser::new(source).template()
    }

    pub fn evaluate(&self, scope: &Scope, functions: &FunctionRegistry) -> Result<Value> {
        match self.segments.as_slice() {
            [] => Ok(Value::String(String::new())),
            [Segment::Expr(expr)] => eval(expr, scope, functions),
            segments => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Expr(expr) => {
                            out.push_str(&stringify(&eval(expr, scope, functions)?))
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }
}

fn eval(expr: &Expr, scope: &Scope, functions: &FunctionRegistry) -> Result<Value> {
    match expr {
        Expr::Variable(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnresolvedVariable(name.clone())),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Call { name, args } => {
            if !functions.contains(name) {
                return Err(Error::UnknownFunction(name.clone()));
            }
            let values = args
                .iter()
                .map(|arg| eval(arg, scope, functions))
                .collect::<Result<Vec<_>>>()?;
            functions.call_function(name, &values)
        }
    }
}

/// Render a string template.
pub fn render_str(source: &str, scope: &Scope, functions: &FunctionRegistry) -> Result<Value> {
    if !source.contains('$') {
        return Ok(Value::String(source.to_string()));
    }
    Template::parse(source)?.evaluate(scope, functions)
}

/// Render a string template and coerce the result to text.
pub fn render_to_string(
    source: &str,
    scope: &Scope,
    functions: &FunctionRegistry,
) -> Result<String> {
    render_str(source, scope, functions).map(|value| stringify(&value))
}

/// Render any value: strings are templates, sequences and mapping values
/// are rendered recursively, other scalars pass through.
pub fn render(value: &Value, scope: &Scope, functions: &FunctionRegistry) -> Result<Value> {
    match value {
        Value::String(s) => render_str(s, scope, functions),
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, scope, functions))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render(item, scope, functions)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// Render `vars` in declaration order into `scope`, each entry seeing the
/// ones before it. Returns the rendered entries.
pub fn render_into(vars: &Scope, scope: &mut Scope, functions: &FunctionRegistry) -> Result<Scope> {
    let mut rendered = Scope::with_capacity(vars.len());
    for (name, value) in vars {
        let value = render(value, scope, functions)?;
        scope.insert(name.clone(), value.clone());
        rendered.insert(name.clone(), value);
    }
    Ok(rendered)
}

/// Text form used when a value is spliced into a larger string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::TemplateSyntax {
            template: self.source.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn template(mut self) -> Result<Template> {
        let mut segments = Vec::new();
        let mut text = String::new();

        while let Some(c) = self.peek() {
            if c != '$' {
                text.push(c);
                self.pos += 1;
                continue;
            }
            match self.peek_at(1) {
                Some('$') => {
                    text.push('$');
                    self.pos += 2;
                }
                Some('{') => {
                    self.pos += 2;
                    let expr = self.braced()?;
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Expr(expr));
                }
                Some(next) if is_ident_start(next) => {
                    self.pos += 1;
                    let name = self.ident();
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Expr(Expr::Variable(name)));
                }
                _ => {
                    text.push('$');
                    self.pos += 1;
                }
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Template { segments })
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// Body of `${...}`, positioned just after the opening brace.
    fn braced(&mut self) -> Result<Expr> {
        self.skip_ws();
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.error("expected a name after '${'"));
        }
        let name = self.ident();
        self.skip_ws();
        let expr = if self.peek() == Some('(') {
            self.pos += 1;
            let args = self.args()?;
            Expr::Call { name, args }
        } else {
            Expr::Variable(name)
        };
        self.skip_ws();
        if self.peek() != Some('}') {
            return Err(self.error("unterminated '${'"));
        }
        self.pos += 1;
        Ok(expr)
    }

    /// Argument list, positioned just after `(`; consumes the closing `)`.
    fn args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.arg()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(other) => {
                    return Err(self.error(format!("unexpected '{other}' in argument list")))
                }
                None => return Err(self.error("unterminated argument list")),
            }
        }
    }

    fn arg(&mut self) -> Result<Expr> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unterminated argument list")),
            Some(',') | Some(')') => Err(self.error("empty argument")),
            Some(q @ ('\'' | '"')) => {
                self.pos += 1;
                self.quoted(q).map(|s| Expr::Literal(Value::String(s)))
            }
            Some('$') if self.peek_at(1) == Some('{') => {
                self.pos += 2;
                self.braced()
            }
            Some('$') if self.peek_at(1).is_some_and(is_ident_start) => {
                self.pos += 1;
                Ok(Expr::Variable(self.ident()))
            }
            Some(c) if is_ident_start(c) => {
                let start = self.pos;
                let name = self.ident();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.pos += 1;
                    let args = self.args()?;
                    return Ok(Expr::Call { name, args });
                }
                self.pos = start;
                self.bare()
            }
            Some(_) => self.bare(),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal"));
            };
            self.pos += 1;
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let Some(escaped) = self.peek() else {
                    return Err(self.error("unterminated string literal"));
                };
                self.pos += 1;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }
    }

    /// Unquoted literal up to the next top-level `,` or `)`.
    fn bare(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                ',' | ')' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        Ok(Expr::Literal(literal(raw.trim())))
    }
}

fn literal(raw: &str) -> Value {
    match raw {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        "null" | "None" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if raw.chars().any(|c| c.is_ascii_digit()) {
        if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return value;
        }
    }
    Value::String(raw.to_string())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Arity;
    use anyhow::anyhow;
    use serde_json::json;

    fn functions() -> FunctionRegistry {
        let mut builder = FunctionRegistry::builder();
        builder
            .function("double", Arity::Exact(1), |args| {
                let n = args[0].as_i64().ok_or_else(|| anyhow!("not an integer"))?;
                Ok(json!(n * 2))
            })
            .function("increment", Arity::Exact(1), |args| {
                let n = args[0].as_i64().ok_or_else(|| anyhow!("not an integer"))?;
                Ok(json!(n + 1))
            })
            .function("add", Arity::Exact(2), |args| {
                let a = args[0].as_i64().unwrap_or_default();
                let b = args[1].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            })
            .function("echo", Arity::Exact(1), |args| Ok(args[0].clone()))
            .function("join", Arity::Range { min: 0, max: 8 }, |args| {
                Ok(Value::String(args.iter().map(stringify).collect::<Vec<_>>().join("|")))
            })
            .function("fail", Arity::Exact(0), |_| Err(anyhow!("boom")))
            .setup_hook("a_setup_hook", |_req, _scope, _env| Ok(None));
        builder.build()
    }

    fn scope(pairs: &[(&str, Value)]) -> Scope {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_nested_calls_preserve_native_types() {
        let functions = functions();
        let mut vars = Scope::new();

        let base = render(&json!({"start": "${double(2)}"}), &vars, &functions).unwrap();
        assert_eq!(base["start"], json!(4));
        assert!(base["start"].is_i64());
        vars.insert("start".into(), base["start"].clone());

        let step = render(&json!({"payload": "${double($start)}"}), &vars, &functions).unwrap();
        assert_eq!(step["payload"], json!(8));
        vars.insert("payload".into(), step["payload"].clone());

        let expect = render_str("${increment($payload)}", &vars, &functions).unwrap();
        assert_eq!(expect, json!(9));
        assert!(expect.is_i64());
    }

    #[test]
    fn test_full_match_variable_is_native() {
        let vars = scope(&[("id", json!(42)), ("flags", json!([true, false]))]);
        assert_eq!(render_str("$id", &vars, &functions()).unwrap(), json!(42));
        assert_eq!(render_str("${id}", &vars, &functions()).unwrap(), json!(42));
        assert_eq!(
            render_str("$flags", &vars, &functions()).unwrap(),
            json!([true, false])
        );
    }

    #[test]
    fn test_partial_match_interpolates_to_string() {
        let vars = scope(&[("id", json!(42)), ("ok", json!(true)), ("none", Value::Null)]);
        let functions = functions();
        assert_eq!(
            render_str("/users/$id", &vars, &functions).unwrap(),
            json!("/users/42")
        );
        assert_eq!(
            render_str("n=${double($id)};", &vars, &functions).unwrap(),
            json!("n=84;")
        );
        assert_eq!(
            render_str("$ok-$none", &vars, &functions).unwrap(),
            json!("true-null")
        );
        assert_eq!(render_str(" $id", &vars, &functions).unwrap(), json!(" 42"));
    }

    #[test]
    fn test_variable_name_stops_at_non_identifier() {
        let vars = scope(&[("host", json!("api")), ("port", json!(8080))]);
        assert_eq!(
            render_str("$host.example.com:$port/v1", &vars, &functions()).unwrap(),
            json!("api.example.com:8080/v1")
        );
    }

    #[test]
    fn test_nested_arguments() {
        let vars = scope(&[("x", json!(3))]);
        let functions = functions();
        assert_eq!(
            render_str("${add(1, ${double(2)})}", &vars, &functions).unwrap(),
            json!(5)
        );
        assert_eq!(
            render_str("${add(double($x), increment(1))}", &vars, &functions).unwrap(),
            json!(8)
        );
    }

    #[test]
    fn test_argument_splitting_respects_quotes_and_brackets() {
        let functions = functions();
        let vars = Scope::new();
        assert_eq!(
            render_str("${echo('a,b')}", &vars, &functions).unwrap(),
            json!("a,b")
        );
        assert_eq!(
            render_str(r#"${echo("say \"hi\"")}"#, &vars, &functions).unwrap(),
            json!("say \"hi\"")
        );
        assert_eq!(
            render_str("${echo([1, 2, 3])}", &vars, &functions).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            render_str("${join(a, 'b)', c)}", &vars, &functions).unwrap(),
            json!("a|b)|c")
        );
    }

    #[test]
    fn test_literal_argument_types() {
        let functions = functions();
        let vars = Scope::new();
        assert_eq!(render_str("${echo(true)}", &vars, &functions).unwrap(), json!(true));
        assert_eq!(render_str("${echo(null)}", &vars, &functions).unwrap(), Value::Null);
        assert_eq!(render_str("${echo(-7)}", &vars, &functions).unwrap(), json!(-7));
        assert_eq!(render_str("${echo(1.5)}", &vars, &functions).unwrap(), json!(1.5));
        assert_eq!(render_str("${echo( demo )}", &vars, &functions).unwrap(), json!("demo"));
        assert_eq!(render_str("${join()}", &vars, &functions).unwrap(), json!(""));
    }

    #[test]
    fn test_unresolved_variable() {
        let err = render_str("$missing", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable(name) if name == "missing"));
        let err = render_str("${double($missing)}", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable(_)));
    }

    #[test]
    fn test_unknown_function() {
        let err = render_str("${nope(1)}", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(name) if name == "nope"));
        let err = render_str("${a_setup_hook()}", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[test]
    fn test_function_failures_are_hook_execution() {
        let err = render_str("${fail()}", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::HookExecution { .. }));
        let err = render_str("${double(1, 2)}", &Scope::new(), &functions()).unwrap_err();
        assert!(matches!(err, Error::HookExecution { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["${double(2)", "${double(2}", "${echo('x)}", "${}", "${add(1,)}"] {
            let err = render_str(source, &Scope::new(), &functions()).unwrap_err();
            assert!(
                matches!(err, Error::TemplateSyntax { .. }),
                "expected syntax error for {source}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_dollar_escapes_and_stray_dollars() {
        let vars = Scope::new();
        assert_eq!(render_str("$$5", &vars, &functions()).unwrap(), json!("$5"));
        assert_eq!(render_str("cost: $", &vars, &functions()).unwrap(), json!("cost: $"));
        assert_eq!(render_str("$1", &vars, &functions()).unwrap(), json!("$1"));
    }

    #[test]
    fn test_render_recurses_and_passes_scalars_through() {
        let vars = scope(&[("name", json!("alice")), ("age", json!(30))]);
        let value = json!({
            "user": {"name": "$name", "age": "$age", "tags": ["$name", 1, null]},
            "active": true,
            "$name": "key stays literal"
        });
        let rendered = render(&value, &vars, &functions()).unwrap();
        assert_eq!(
            rendered,
            json!({
                "user": {"name": "alice", "age": 30, "tags": ["alice", 1, null]},
                "active": true,
                "$name": "key stays literal"
            })
        );
    }

    #[test]
    fn test_render_into_sees_earlier_entries() {
        let functions = functions();
        let mut vars = Scope::new();
        vars.insert("a".into(), json!("${double(5)}"));
        vars.insert("b".into(), json!("${increment($a)}"));
        let mut target = Scope::new();
        let rendered = render_into(&vars, &mut target, &functions).unwrap();
        assert_eq!(rendered["b"], json!(11));
        assert_eq!(target["a"], json!(10));
    }
}
