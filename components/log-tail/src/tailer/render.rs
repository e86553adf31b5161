//! Human-readable rendering of `TailLogEntriesResponse` batches.
//!
//! Each batch is written as one block: a blank line, one line per entry,
//! then one line per suppression notice. Callers flush after every block so
//! entries show up as soon as they are received.

// Local crates
use crate::helpers::converters::{struct_to_json, timestamp_to_datetime};
use crate::proto::{
    LogEntry, TailLogEntriesResponse, google::logging::r#type::LogSeverity, log_entry::Payload,
    tail_log_entries_response::suppression_info::Reason,
};

// External crates
use chrono::SecondsFormat;
use std::io::{self, Write};

/// Whether a response carries anything worth printing.
pub fn is_empty(response: &TailLogEntriesResponse) -> bool {
    response.entries.is_empty() && response.suppression_info.is_empty()
}

/// Write one response block and flush it.
pub fn write_response<W: Write>(out: &mut W, response: &TailLogEntriesResponse) -> io::Result<()> {
    writeln!(out)?;
    for entry in &response.entries {
        writeln!(out, "{}", format_entry(entry))?;
    }
    for info in &response.suppression_info {
        let reason = Reason::try_from(info.reason)
            .map(|r| r.as_str_name().to_string())
            .unwrap_or_else(|_| info.reason.to_string());
        writeln!(
            out,
            "-- {} entries suppressed ({reason})",
            info.suppressed_count
        )?;
    }
    out.flush()
}

/// Format a single entry as `<timestamp> <SEVERITY> <log> [<resource>] <payload>`.
pub fn format_entry(entry: &LogEntry) -> String {
    let timestamp = entry
        .timestamp
        .as_ref()
        .or(entry.receive_timestamp.as_ref())
        .and_then(timestamp_to_datetime)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string());

    let severity = LogSeverity::try_from(entry.severity)
        .map(|s| s.as_str_name().to_string())
        .unwrap_or_else(|_| entry.severity.to_string());

    let mut line = format!("{timestamp} {severity:<9} {}", entry.log_name);

    if let Some(resource) = entry.resource.as_ref().filter(|r| !r.r#type.is_empty()) {
        line.push_str(&format!(" [{}]", resource.r#type));
    }

    match &entry.payload {
        Some(Payload::TextPayload(text)) => {
            line.push(' ');
            line.push_str(text.trim_end_matches('\n'));
        }
        Some(Payload::JsonPayload(value)) => {
            line.push(' ');
            line.push_str(&struct_to_json(value).to_string());
        }
        Some(Payload::ProtoPayload(any)) => {
            line.push_str(&format!(" <{}> ({} bytes)", any.type_url, any.value.len()));
        }
        None => {}
    }

    line
}
