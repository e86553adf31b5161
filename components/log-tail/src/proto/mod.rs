//! Generated Cloud Logging protobuf types and the `LoggingServiceV2` client.
//!
//! Module nesting mirrors the protobuf packages so that the cross-package
//! paths emitted by prost resolve.
#![allow(missing_docs)]

pub mod google {
    pub mod api {
        tonic::include_proto!("google.api");
    }
    pub mod logging {
        pub mod r#type {
            tonic::include_proto!("google.logging.r#type");
        }
        pub mod v2 {
            tonic::include_proto!("google.logging.v2");
        }
    }
}

pub use google::logging::v2::{
    LogEntry, TailLogEntriesRequest, TailLogEntriesResponse, log_entry,
    logging_service_v2_client::LoggingServiceV2Client, tail_log_entries_response,
};
