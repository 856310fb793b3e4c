//! Rule-based lifecycle tag engine for course-platform engagement.
//!
//! The crate normalizes per-platform engagement signals into uniform
//! statistics, evaluates priority-ordered rules with cooldown guards, and
//! synchronizes the resulting tag changes with an external contact-tagging
//! service while keeping an auditable communication history.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
