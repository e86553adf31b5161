//! This module defines conversions between internal structs and their protobuf equivalents.
//!
//! Outbound conversions build the subscription request from `RunParameters`.
//! Inbound conversions turn well-known protobuf types into `chrono` and
//! `serde_json` values for rendering. All of them are total.

// Local crates
use crate::proto::TailLogEntriesRequest;
use crate::tailer::models::RunParameters;

// External crates
use chrono::{DateTime, Utc};
use prost_types::{Struct, Timestamp, value::Kind};
use serde_json::{Map, Number, Value};
use std::time::Duration;

/// Build the subscription request: one resource name derived from the
/// project and the filter copied verbatim.
impl From<&RunParameters> for TailLogEntriesRequest {
    fn from(params: &RunParameters) -> Self {
        Self {
            resource_names: vec![params.resource_name()],
            filter: params.filter.clone(),
            buffer_window: params.buffer_window.map(proto_duration),
        }
    }
}

/// Convert std `Duration` -> `prost_types::Duration`.
/// Parsed durations never exceed `i64::MAX` nanoseconds, so seconds fit.
pub fn proto_duration(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

/// Convert `prost_types::Timestamp` -> `chrono::DateTime<Utc>`.
/// Returns `None` for timestamps outside chrono's range or with invalid nanos.
pub fn timestamp_to_datetime(ts: &Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    DateTime::from_timestamp(ts.seconds, nanos)
}

/// Convert `prost_types::Struct` -> `serde_json::Value` (an object).
pub fn struct_to_json(value: &Struct) -> Value {
    let map: Map<String, Value> = value
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    Value::Object(map)
}

fn value_to_json(value: &prost_types::Value) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        // NaN and infinities have no JSON form
        Some(Kind::NumberValue(n)) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::StructValue(s)) => struct_to_json(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.iter().map(value_to_json).collect()),
    }
}
