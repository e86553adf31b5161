//! Tail Cloud Logging entries for a project from the command line.
//!
//! The binary parses flags into [`tailer::models::RunParameters`], connects
//! a [`tailer::client::GrpcConnector`] and hands both to
//! [`runtime::runtime::run_log_tail`], which streams rendered entries to
//! stdout until the up-time elapses, a signal arrives, the stream ends or
//! fails.

pub mod cli;
pub mod helpers;
pub mod instrumentation;
pub mod proto;
pub mod runtime;
pub mod tailer;
