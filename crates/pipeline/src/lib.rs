//! Job orchestration for LTX video generation on ComfyUI.
//!
//! [`pipeline::Pipeline::run`] takes one job document through parameter
//! resolution, template binding, submission, completion polling and
//! artifact lookup, and always returns a structured [`result::JobResult`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod poller;
pub mod result;
