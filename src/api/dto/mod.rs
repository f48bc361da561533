//! Data Transfer Objects for REST request/response serialization.

pub mod job_dto;
pub mod schedule_dto;

pub use job_dto::*;
pub use schedule_dto::*;
