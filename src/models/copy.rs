//! Request options, per-object tasks, and the summary of a copy run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-tunable behaviour for a single run.
///
/// Both switches only matter when a custom extension is configured.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CopyOptions {
    /// Replace an existing extension with the configured one.
    pub apply_custom_extension: bool,

    /// Append the configured extension to keys that have none.
    pub add_extension_to_files_without_ext: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            apply_custom_extension: false,
            add_extension_to_files_without_ext: true,
        }
    }
}

/// One object to move: where it is read from and where it is written to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyTask {
    pub source_key: String,
    pub destination_key: String,
}

/// Where a run currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Validating,
    Listing,
    Copying,
    Completed,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Validating => "validating",
            RunPhase::Listing => "listing",
            RunPhase::Copying => "copying",
            RunPhase::Completed => "completed",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Terminal summary of one orchestration run.
///
/// `success` only says the run got through listing; partial failures show
/// up in `failure_count`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopyRunResult {
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_count: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl CopyRunResult {
    /// A run that stopped before any object was attempted.
    pub fn aborted(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            success_count: 0,
            failure_count: 0,
            total_count: 0,
            message: message.into(),
            error_details: details,
        }
    }

    /// A run whose copy phase ran to the end.
    pub fn completed(success_count: usize, failure_count: usize) -> Self {
        Self {
            success: true,
            success_count,
            failure_count,
            total_count: success_count + failure_count,
            message: "Copy operation completed".into(),
            error_details: None,
        }
    }
}
