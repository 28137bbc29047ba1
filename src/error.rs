//! Error taxonomy for the gateway pipeline.
//!
//! Errors are split into transient failures (external calls that timed out
//! or could not connect) and permanent ones (authorization, unsupported
//! query types, malformed input). Only transient errors are retried.

use crate::models::QueryType;
use crate::pipeline::timing::TimingReport;
use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// External collaborators the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Directory,
    QueryExecution,
    Tagging,
    Aggregation,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Directory => write!(f, "directory (PM cell)"),
            Service::QueryExecution => write!(f, "query execution (CRC cell)"),
            Service::Tagging => write!(f, "distributed tagging"),
            Service::Aggregation => write!(f, "secure aggregation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No permitted query type for roles [{}]", roles.join(", "))]
    Authorization { roles: Vec<String> },

    #[error("Query type {0} not supported yet")]
    UnsupportedQueryType(QueryType),

    #[error("Malformed query request: {reason}")]
    MalformedInput {
        reason: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{service} unreachable: {message}")]
    Transport {
        service: Service,
        message: String,
        timed_out: bool,
    },

    #[error("{service} returned an invalid response: {message}")]
    Service { service: Service, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn transport<E: fmt::Display>(service: Service, e: E) -> Self {
        Self::Transport {
            service,
            message: e.to_string(),
            timed_out: false,
        }
    }

    pub fn timeout(service: Service, seconds: u64) -> Self {
        Self::Transport {
            service,
            message: format!("request timed out after {}s", seconds),
            timed_out: true,
        }
    }

    pub fn service<E: fmt::Display>(service: Service, e: E) -> Self {
        Self::Service {
            service,
            message: e.to_string(),
        }
    }

    pub fn config<E: fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Transport { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error category for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Timeout or connection problem, worth another attempt.
    Transient,
    /// Retrying cannot change the outcome.
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pipeline abort, with whatever timing was accumulated before it.
#[derive(Debug, Error)]
#[error("Query {query_name} failed at stage {stage}: {source}")]
pub struct PipelineFailure {
    pub query_name: String,
    pub stage: Stage,
    #[source]
    pub source: GatewayError,
    pub timings: TimingReport,
}
