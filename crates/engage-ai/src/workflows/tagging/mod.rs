//! Tag orchestration: naming normalization, the external tag-service
//! client boundary, the local tag-state mirror, and the orchestrator tying
//! them together.

mod client;
mod mirror;
mod naming;
mod orchestrator;

pub use client::{
    with_retries, ContactId, ContactTagClient, HttpContactTagClient, RemoteTag, RetryPolicy,
    TagServiceError,
};
pub use mirror::{ContactTagState, MirroredTag, TagStateRepository};
pub use naming::TagName;
pub use orchestrator::{
    OrchestrationError, SyncWarning, TagApplication, TagOrchestrator, TagRemoval,
};
