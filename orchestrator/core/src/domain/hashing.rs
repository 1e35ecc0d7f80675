// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Stable Hasher
//!
//! Canonical JSON serialization plus SHA-256. Object keys are sorted
//! recursively, arrays keep their order, output is compact. The digest is the
//! lowercase hex SHA-256 of the canonical UTF-8 bytes, so two values that
//! differ only in key order hash identically in every process.
//!
//! Floating-point numbers are rendered the way ECMAScript's `Number::toString`
//! renders them (`1.0` as `1`, `-0.0` as `0`, `1e21` as `1e+21`), so a document
//! hashed here and by a `JSON.stringify`-based signer agrees. Integers keep
//! their exact decimal text.
//!
//! Used for plan hashes, receipt hashes and idempotency key derivation.

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("value is not representable as JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Render `value` as canonical JSON.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A string always serializes.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(number) => write_number(number, out),
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_number(number: &Number, out: &mut String) {
    if number.is_i64() || number.is_u64() {
        out.push_str(&number.to_string());
        return;
    }
    match number.as_f64() {
        Some(f) => write_f64(f, out),
        None => out.push_str(&number.to_string()),
    }
}

/// ECMAScript `Number::toString(10)` for a finite double.
fn write_f64(f: f64, out: &mut String) {
    if f == 0.0 {
        out.push('0');
        return;
    }
    if f < 0.0 {
        out.push('-');
    }
    // Shortest round-trip digits, e.g. "1.2345e-7".
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let k = digits.len() as i32;
    let n = exponent.parse::<i32>().unwrap_or(0) + 1;

    if k <= n && n <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat('0').take((n - k) as usize));
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        out.push_str(int);
        out.push('.');
        out.push_str(frac);
    } else if -6 < n && n <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-n) as usize));
        out.push_str(&digits);
    } else {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        out.push('e');
        out.push(if n - 1 >= 0 { '+' } else { '-' });
        out.push_str(&(n - 1).abs().to_string());
    }
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Stable hash of a JSON value.
pub fn stable_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Stable hash of any serializable value.
pub fn stable_hash_of<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let value = serde_json::to_value(value)?;
    Ok(stable_hash(&value))
}

/// `sha256(action|plan_hash|step_id|threadId)`
pub fn derive_idempotency_key(action: &str, plan_hash: &str, step_id: &str, thread_id: &str) -> String {
    sha256_hex(format!("{action}|{plan_hash}|{step_id}|{thread_id}"))
}
