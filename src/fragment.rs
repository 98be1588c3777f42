//! Fragments are the pieces of a streamed output.
//!
//! A fragment is an ordinary [`Value`]. Fragments from one stream are folded
//! back into a full value with [`concat`]:
//!
//! - strings are appended
//! - arrays are extended
//! - objects are merged key by key, recursively
//! - `null` on either side yields the other side
//! - any other right-hand value replaces the left-hand one

use crate::error::{ChainError, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

/// A lazily produced, forward-only sequence of fragments.
pub type FragmentStream = BoxStream<'static, Result<Value>>;

/// Combine two consecutive fragments.
pub fn concat(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Null, r) => r,
        (l, Value::Null) => l,
        (Value::String(mut l), Value::String(r)) => {
            l.push_str(&r);
            Value::String(l)
        }
        (Value::Array(mut l), Value::Array(r)) => {
            l.extend(r);
            Value::Array(l)
        }
        (Value::Object(mut l), Value::Object(r)) => {
            for (key, value) in r {
                let merged = match l.remove(&key) {
                    Some(existing) => concat(existing, value),
                    None => value,
                };
                l.insert(key, merged);
            }
            Value::Object(l)
        }
        (_, r) => r,
    }
}

/// Drain a stream, folding all fragments together.
///
/// An empty stream aggregates to `null`.
pub async fn collect(mut stream: FragmentStream) -> Result<Value> {
    let mut acc = Value::Null;
    while let Some(fragment) = stream.next().await {
        acc = concat(acc, fragment?);
    }
    Ok(acc)
}

/// A stream yielding exactly one fragment.
pub fn once(value: Value) -> FragmentStream {
    futures::stream::once(async move { Ok(value) }).boxed()
}

/// A stream yielding a single error.
pub fn fail(err: ChainError) -> FragmentStream {
    futures::stream::once(async move { Err(err) }).boxed()
}
