//! Functions and hooks available to every case file.

use crate::error::HookError;
use crate::functions::{Arity, FunctionRegistry, FunctionRegistryBuilder};
use crate::model::{Environment, RenderedRequest, ResponseRecord, Scope};
use crate::template::stringify;
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Registry holding only the built-ins.
pub fn registry(env: &Environment) -> FunctionRegistry {
    let mut builder = FunctionRegistry::builder();
    register(&mut builder, env);
    builder.build()
}

pub fn register(builder: &mut FunctionRegistryBuilder, env: &Environment) {
    let env = Arc::new(env.clone());

    builder
        .function("ts", Arity::Exact(0), |_| Ok(json!(chrono::Utc::now().timestamp())))
        .function("sha256", Arity::Exact(1), |args| {
            Ok(Value::String(sha256_hex(&stringify(&args[0]))))
        })
        .function("md5", Arity::Exact(1), |args| {
            Ok(Value::String(md5_hex(&stringify(&args[0]))))
        })
        .function("sign", Arity::Exact(2), |args| {
            let raw = format!("{}{}", stringify(&args[0]), stringify(&args[1]));
            Ok(Value::String(md5_hex(&raw)))
        })
        .function("uuid4", Arity::Exact(0), |_| {
            Ok(Value::String(uuid::Uuid::new_v4().to_string()))
        })
        .function("uid", Arity::Exact(0), |_| {
            Ok(Value::String(uuid::Uuid::new_v4().simple().to_string()))
        })
        .function("short_uid", Arity::Range { min: 0, max: 1 }, |args| {
            let n = match args.first() {
                Some(v) => as_int(v)?,
                None => 8,
            }
            .clamp(1, 32) as usize;
            let hex = uuid::Uuid::new_v4().simple().to_string();
            Ok(Value::String(hex[..n].to_string()))
        })
        .function("urlencode", Arity::Exact(1), |args| {
            let raw = stringify(&args[0]);
            Ok(Value::String(
                url::form_urlencoded::byte_serialize(raw.as_bytes()).collect(),
            ))
        })
        .function("echo", Arity::Exact(1), |args| Ok(args[0].clone()))
        .function("sum_two_int", Arity::Exact(2), |args| {
            Ok(json!(as_int(&args[0])? + as_int(&args[1])?))
        })
        .function("ENV", Arity::Range { min: 1, max: 2 }, move |args| {
            let name = stringify(&args[0]);
            match (env.get(&name), args.get(1)) {
                (Some(value), _) => Ok(Value::String(value.clone())),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(anyhow!("environment variable '{name}' is not set")),
            }
        })
        .setup_hook("setup_hook_sign_request", sign_request)
        .setup_hook("setup_hook_api_key", api_key)
        .setup_hook("setup_hook_hmac_sign", hmac_sign)
        .teardown_hook("teardown_hook_assert_status_ok", assert_status_ok)
        .teardown_hook("teardown_hook_capture_request_id", capture_request_id);
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn hmac_sha256_hex(secret: &[u8], message: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn as_int(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| anyhow!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| anyhow!("'{s}' is not an integer")),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(anyhow!("{other} is not an integer")),
    }
}

/// Adds `X-Timestamp` and `X-Signature` (md5 of `METHOD|URL|TS`).
fn sign_request(
    request: &mut RenderedRequest,
    _scope: &Scope,
    _env: &Environment,
) -> Result<Option<Scope>, HookError> {
    let ts = chrono::Utc::now().timestamp().to_string();
    let signature = md5_hex(&format!("{}|{}|{}", request.method, request.url, ts));
    request.headers.insert("X-Timestamp".into(), ts);
    request
        .headers
        .insert("X-Signature".into(), signature.clone());

    let mut vars = Scope::new();
    vars.insert("last_signature".into(), Value::String(signature));
    Ok(Some(vars))
}

/// Injects `X-API-Key`, preferring the environment over variables and
/// `API_KEY` over `X_API_KEY`.
fn api_key(
    request: &mut RenderedRequest,
    scope: &Scope,
    env: &Environment,
) -> Result<Option<Scope>, HookError> {
    let candidates = [
        env.get("API_KEY").cloned(),
        scope.get("API_KEY").and_then(Value::as_str).map(str::to_string),
        env.get("X_API_KEY").cloned(),
        scope.get("X_API_KEY").and_then(Value::as_str).map(str::to_string),
    ];
    if let Some(key) = candidates
        .into_iter()
        .flatten()
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
    {
        request.headers.insert("X-API-Key".into(), key);
    }
    Ok(None)
}

/// Adds `X-Timestamp` and `X-HMAC`, an HMAC-SHA256 of `METHOD|URL|TS`
/// keyed by `APP_SECRET` from the environment or, failing that, the scope.
fn hmac_sign(
    request: &mut RenderedRequest,
    scope: &Scope,
    env: &Environment,
) -> Result<Option<Scope>, HookError> {
    let secret = env
        .get("APP_SECRET")
        .filter(|s| !s.is_empty())
        .cloned()
        .or_else(|| scope.get("APP_SECRET").map(stringify))
        .unwrap_or_default();
    let ts = chrono::Utc::now().timestamp().to_string();
    let raw = format!("{}|{}|{}", request.method, request.url, ts);
    let signature = hmac_sha256_hex(secret.as_bytes(), &raw).map_err(HookError::Failed)?;
    request.headers.insert("X-Timestamp".into(), ts);
    request.headers.insert("X-HMAC".into(), signature.clone());

    let mut vars = Scope::new();
    vars.insert("last_hmac".into(), Value::String(signature));
    Ok(Some(vars))
}

fn assert_status_ok(
    response: &mut ResponseRecord,
    _scope: &Scope,
    _env: &Environment,
) -> Result<Option<Scope>, HookError> {
    if response.status_code != 200 {
        return Err(HookError::Assertion(format!(
            "status not 200: {}",
            response.status_code
        )));
    }
    Ok(None)
}

fn capture_request_id(
    response: &mut ResponseRecord,
    _scope: &Scope,
    _env: &Environment,
) -> Result<Option<Scope>, HookError> {
    Ok(response.body.get("request_id").map(|id| {
        let mut vars = Scope::new();
        vars.insert("request_id".into(), id.clone());
        vars
    }))
}
