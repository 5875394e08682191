//! Response lookups and assertion comparators.

use crate::functions::FunctionRegistry;
use crate::model::{AssertionOutcome, Comparator, ResponseRecord, Scope, Validator};
use crate::template::{self, stringify};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Walk a dot-separated path (`data.items.0.id`, `items[0].id`) into `value`.
pub fn get_value_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = value;

    for part in normalized.split('.') {
        if part.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Look up a check path in a response.
///
/// Roots: `status_code` (or `status`), `elapsed_ms`, `headers[.name]`,
/// `body[.path]`, `$[.path]` and `stream_events[.path]`.
pub fn lookup(response: &ResponseRecord, check: &str) -> Option<Value> {
    let check = check.trim();
    let (root, rest) = match check.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (check, None),
    };

    match (root, rest) {
        ("status_code" | "status", None) => Some(json!(response.status_code)),
        ("elapsed_ms", None) => Some(json!(response.elapsed_ms)),
        ("headers", None) => Some(Value::Object(
            response
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>(),
        )),
        ("headers", Some(name)) => response.header(name).map(|v| Value::String(v.to_string())),
        ("body" | "$", None) => Some(response.body.clone()),
        ("body" | "$", Some(path)) => get_value_by_path(&response.body, path).cloned(),
        ("stream_events", path) => {
            let events = serde_json::to_value(response.stream_events.as_ref()?).ok()?;
            get_value_by_path(&events, path.unwrap_or("")).cloned()
        }
        _ => None,
    }
}

/// Resolve a check: `$name` / `${fn()}` render as templates, anything else
/// is a response path.
pub fn resolve(
    check: &str,
    response: &ResponseRecord,
    scope: &Scope,
    functions: &FunctionRegistry,
) -> Result<Value, String> {
    let trimmed = check.trim();
    if trimmed.starts_with('$') && trimmed != "$" && !trimmed.starts_with("$.") {
        return template::render_str(trimmed, scope, functions).map_err(|e| e.to_string());
    }
    lookup(response, trimmed).ok_or_else(|| format!("'{trimmed}' not found in response"))
}

/// Evaluate one validator into an outcome. Never short-circuits the caller.
pub fn evaluate(
    validator: &Validator,
    response: &ResponseRecord,
    scope: &Scope,
    functions: &FunctionRegistry,
) -> AssertionOutcome {
    let mut outcome = AssertionOutcome {
        check: validator.check.clone(),
        comparator: validator.comparator,
        expect: validator.expect.clone(),
        actual: None,
        passed: false,
        message: None,
    };

    let expect = match template::render(&validator.expect, scope, functions) {
        Ok(expect) => expect,
        Err(err) => {
            outcome.message = Some(format!("failed to render expected value: {err}"));
            return outcome;
        }
    };
    outcome.expect = expect;

    let actual = match resolve(&validator.check, response, scope, functions) {
        Ok(actual) => actual,
        Err(message) => {
            outcome.message = Some(message);
            return outcome;
        }
    };

    match compare(validator.comparator, &actual, &outcome.expect) {
        Ok(true) => outcome.passed = true,
        Ok(false) => {
            outcome.message = Some(format!(
                "{} {}: expected {}, actual {}",
                validator.check,
                validator.comparator.as_str(),
                outcome.expect,
                actual
            ));
        }
        Err(message) => outcome.message = Some(message),
    }
    outcome.actual = Some(actual);
    outcome
}

/// Apply `comparator` to `actual` and `expect`.
///
/// `Err` describes operands the comparator cannot be applied to.
pub fn compare(comparator: Comparator, actual: &Value, expect: &Value) -> Result<bool, String> {
    match comparator {
        Comparator::Eq => Ok(values_equal(actual, expect)),
        Comparator::Ne => Ok(!values_equal(actual, expect)),
        Comparator::Gt => order(actual, expect).map(|o| o == Ordering::Greater),
        Comparator::Ge => order(actual, expect).map(|o| o != Ordering::Less),
        Comparator::Lt => order(actual, expect).map(|o| o == Ordering::Less),
        Comparator::Le => order(actual, expect).map(|o| o != Ordering::Greater),
        Comparator::Contains => contains(actual, expect),
        Comparator::NotContains => contains(actual, expect).map(|found| !found),
        Comparator::StartsWith => Ok(stringify(actual).starts_with(&stringify(expect))),
        Comparator::EndsWith => Ok(stringify(actual).ends_with(&stringify(expect))),
        Comparator::Regex => {
            let pattern = stringify(expect);
            let re = Regex::new(&pattern)
                .map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
            Ok(re.is_match(&stringify(actual)))
        }
        Comparator::LenEq => length_cmp(actual, expect).map(|o| o == Ordering::Equal),
        Comparator::LenGt => length_cmp(actual, expect).map(|o| o == Ordering::Greater),
        Comparator::LenLt => length_cmp(actual, expect).map(|o| o == Ordering::Less),
        Comparator::In => contains(expect, actual),
        Comparator::NotIn => contains(expect, actual).map(|found| !found),
        Comparator::TypeMatch => type_matches(actual, expect),
    }
}

/// Equality where numbers compare by value (`200 == 200.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn order(actual: &Value, expect: &Value) -> Result<Ordering, String> {
    match (actual, expect) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| format!("cannot order {a} and {b}"))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!("cannot order {actual} against {expect}")),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match container {
        Value::String(s) => Ok(s.contains(&stringify(item))),
        Value::Array(items) => Ok(items.iter().any(|x| values_equal(x, item))),
        Value::Object(map) => Ok(map.contains_key(&stringify(item))),
        other => Err(format!("{other} is not a string, list or mapping")),
    }
}

fn length_cmp(actual: &Value, expect: &Value) -> Result<Ordering, String> {
    let len = match actual {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("{other} has no length")),
    };
    let expected = match expect {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("expected length {expect} is not a non-negative integer"))?;
    Ok((len as u64).cmp(&expected))
}

fn type_matches(actual: &Value, expect: &Value) -> Result<bool, String> {
    let name = stringify(expect).to_lowercase();
    let matched = match name.as_str() {
        "int" | "integer" => actual.is_i64() || actual.is_u64(),
        "float" | "double" => actual.is_f64(),
        "number" => actual.is_number(),
        "str" | "string" => actual.is_string(),
        "bool" | "boolean" => actual.is_boolean(),
        "list" | "array" => actual.is_array(),
        "dict" | "object" | "map" | "mapping" => actual.is_object(),
        "null" | "none" => actual.is_null(),
        other => return Err(format!("unknown type name '{other}'")),
    };
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use indexmap::IndexMap;

    fn response() -> ResponseRecord {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("x-request-id".to_string(), "r-9".to_string());
        ResponseRecord {
            status_code: 201,
            headers,
            body: json!({
                "data": {
                    "id": 42,
                    "name": "alice",
                    "items": [{"id": "item-1"}, {"id": "item-2"}],
                    "ratio": 0.5
                }
            }),
            elapsed_ms: 12.0,
            stream_events: None,
        }
    }

    fn validator(comparator: Comparator, check: &str, expect: Value) -> Validator {
        Validator {
            comparator,
            check: check.to_string(),
            expect,
        }
    }

    #[test]
    fn test_get_value_by_path() {
        let value = json!({"a": {"b": [10, {"c": true}]}});
        assert_eq!(get_value_by_path(&value, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_value_by_path(&value, "a.b[1].c"), Some(&json!(true)));
        assert_eq!(get_value_by_path(&value, ""), Some(&value));
        assert_eq!(get_value_by_path(&value, "a.x"), None);
        assert_eq!(get_value_by_path(&value, "a.b.9"), None);
    }

    #[test]
    fn test_lookup_roots() {
        let res = response();
        assert_eq!(lookup(&res, "status_code"), Some(json!(201)));
        assert_eq!(lookup(&res, "status"), Some(json!(201)));
        assert_eq!(lookup(&res, "headers.X-Request-Id"), Some(json!("r-9")));
        assert_eq!(lookup(&res, "body.data.items.1.id"), Some(json!("item-2")));
        assert_eq!(lookup(&res, "$.data.id"), Some(json!(42)));
        assert_eq!(lookup(&res, "$"), Some(res.body.clone()));
        assert_eq!(lookup(&res, "elapsed_ms"), Some(json!(12.0)));
        assert_eq!(lookup(&res, "status_code.x"), None);
        assert_eq!(lookup(&res, "cookies"), None);
        assert_eq!(lookup(&res, "stream_events"), None);
    }

    #[test]
    fn test_lookup_stream_events() {
        let mut res = response();
        res.stream_events = Some(vec![StreamEvent {
            index: 0,
            event: "message".into(),
            data: json!({"content": "hi"}),
        }]);
        assert_eq!(lookup(&res, "stream_events.0.data.content"), Some(json!("hi")));
        assert_eq!(
            lookup(&res, "stream_events").and_then(|v| v.as_array().map(Vec::len)),
            Some(1)
        );
    }

    #[test]
    fn test_resolve_renders_variables() {
        let mut scope = Scope::new();
        scope.insert("expected_id".into(), json!(42));
        let registry = FunctionRegistry::default();
        assert_eq!(
            resolve("$expected_id", &response(), &scope, &registry),
            Ok(json!(42))
        );
        assert!(resolve("$missing", &response(), &scope, &registry).is_err());
        assert_eq!(
            resolve("$.data.name", &response(), &scope, &registry),
            Ok(json!("alice"))
        );
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(values_equal(&json!(200), &json!(200.0)));
        assert!(values_equal(&json!({"a": [1]}), &json!({"a": [1.0]})));
        assert!(!values_equal(&json!("200"), &json!(200)));
    }

    #[test]
    fn test_comparators() {
        let cases = [
            (Comparator::Eq, json!(1), json!(1), true),
            (Comparator::Ne, json!(1), json!(2), true),
            (Comparator::Gt, json!(3), json!(2), true),
            (Comparator::Ge, json!(2), json!(2.0), true),
            (Comparator::Lt, json!("a"), json!("b"), true),
            (Comparator::Le, json!(3), json!(2), false),
            (Comparator::Contains, json!("alice"), json!("lic"), true),
            (Comparator::Contains, json!([1, 2]), json!(2), true),
            (Comparator::Contains, json!({"k": 1}), json!("k"), true),
            (Comparator::NotContains, json!([1, 2]), json!(3), true),
            (Comparator::StartsWith, json!("us_01"), json!("us_"), true),
            (Comparator::EndsWith, json!("file.json"), json!(".json"), true),
            (Comparator::Regex, json!("abc-123"), json!(r"^\w+-\d+$"), true),
            (Comparator::LenEq, json!([1, 2, 3]), json!(3), true),
            (Comparator::LenGt, json!("abcd"), json!(2), true),
            (Comparator::LenLt, json!({"a": 1}), json!("1"), false),
            (Comparator::In, json!("b"), json!(["a", "b"]), true),
            (Comparator::NotIn, json!("z"), json!(["a", "b"]), true),
            (Comparator::TypeMatch, json!(1), json!("int"), true),
            (Comparator::TypeMatch, json!(1.5), json!("int"), false),
            (Comparator::TypeMatch, json!(null), json!("None"), true),
        ];
        for (comparator, actual, expect, want) in cases {
            assert_eq!(
                compare(comparator, &actual, &expect),
                Ok(want),
                "{comparator:?} {actual} {expect}"
            );
        }
    }

    #[test]
    fn test_comparator_operand_errors() {
        assert!(compare(Comparator::Gt, &json!("a"), &json!(1)).is_err());
        assert!(compare(Comparator::Contains, &json!(5), &json!(5)).is_err());
        assert!(compare(Comparator::LenEq, &json!(5), &json!(1)).is_err());
        assert!(compare(Comparator::Regex, &json!("x"), &json!("(")).is_err());
        assert!(compare(Comparator::TypeMatch, &json!(1), &json!("decimal")).is_err());
    }

    #[test]
    fn test_evaluate_outcomes() {
        let registry = FunctionRegistry::default();
        let scope = Scope::new();
        let res = response();

        let ok = evaluate(
            &validator(Comparator::Eq, "status_code", json!(201)),
            &res,
            &scope,
            &registry,
        );
        assert!(ok.passed);
        assert_eq!(ok.actual, Some(json!(201)));
        assert!(ok.message.is_none());

        let mismatch = evaluate(
            &validator(Comparator::Eq, "body.data.name", json!("bob")),
            &res,
            &scope,
            &registry,
        );
        assert!(!mismatch.passed);
        assert_eq!(mismatch.actual, Some(json!("alice")));
        assert!(mismatch.message.unwrap().contains("expected \"bob\""));

        let missing = evaluate(
            &validator(Comparator::Eq, "body.nope", json!(1)),
            &res,
            &scope,
            &registry,
        );
        assert!(!missing.passed);
        assert!(missing.actual.is_none());

        let bad_expect = evaluate(
            &validator(Comparator::Eq, "status_code", json!("$undefined")),
            &res,
            &scope,
            &registry,
        );
        assert!(!bad_expect.passed);
        assert!(bad_expect.message.unwrap().contains("undefined"));
    }
}
