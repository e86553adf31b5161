//! Shared helpers: duration parsing, protobuf conversions, profile loading
//! and shutdown signalling.

pub mod converters;
pub mod duration;
pub mod load_config;
pub mod shutdown;
