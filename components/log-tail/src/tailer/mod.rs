//! Talking to the tailing service: run models, the streaming client and
//! rendering of received batches.

pub mod client;
pub mod models;
pub mod render;
