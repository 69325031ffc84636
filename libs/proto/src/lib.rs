//! Protobuf messages and gRPC stubs for the qscheduler gateway.

pub mod qscheduler {
    pub mod v1 {
        tonic::include_proto!("qscheduler.v1");

        pub use quota_scheduler_client::QuotaSchedulerClient;
        pub use quota_scheduler_server::{QuotaScheduler, QuotaSchedulerServer};
    }
}

pub use prost_types::Timestamp;
