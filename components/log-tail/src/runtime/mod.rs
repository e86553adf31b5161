//! Run lifecycle.

pub mod runtime;
