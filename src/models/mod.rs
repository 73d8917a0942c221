// Shared data model: snapshots, wire contract, aggregation state

mod agent;
mod domain;
mod report;
mod snapshot;

pub use agent::{
    AgentState, AgentStatus, AgentSummary, CumulativeMetrics, RestartDetection, RestartReason,
};
pub use domain::DomainMetrics;
pub use report::{
    AgentInfo, Report, ReportMetadata, ReportRequest, ReportResponse, SystemMetrics,
};
pub use snapshot::Snapshot;
