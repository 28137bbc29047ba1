//! Boundaries to the external collaborators of the pipeline.
//!
//! The pipeline only sees these traits; the HTTP clients in `cells` and
//! `unlynx` implement them, and tests swap in in-memory doubles.

use crate::error::GatewayError;
use crate::models::{MessageHeader, PatientSet, QueryRequest, QueryResponse, UserContext};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Result of a protocol run plus the timings it reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolReply<T> {
    pub value: T,
    /// Milliseconds per protocol phase.
    pub timings: BTreeMap<String, f64>,
}

/// User directory (authentication, roles, public key).
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn user_information(&self, header: &MessageHeader) -> Result<UserContext, GatewayError>;
}

/// Local query engine of the site.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a query definition and return the response envelope.
    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, GatewayError>;

    /// Fetch the patients of a result set with their encrypted dummy flags.
    async fn patient_set(
        &self,
        header: &MessageHeader,
        patient_set_id: &str,
        include_obfuscated: bool,
    ) -> Result<PatientSet, GatewayError>;
}

/// Distributed deterministic tagging.
///
/// Tokens come back in the order of the terms sent; nothing else links them.
#[async_trait]
pub trait TaggingProtocol: Send + Sync {
    async fn compute_tags(
        &self,
        query_name: &str,
        terms: &[String],
    ) -> Result<ProtocolReply<Vec<String>>, GatewayError>;
}

/// Secure aggregation of the dummy flags under the requester's key.
#[async_trait]
pub trait AggregationProtocol: Send + Sync {
    async fn aggregate(
        &self,
        query_name: &str,
        public_key: &str,
        dummy_flags: &[String],
    ) -> Result<ProtocolReply<String>, GatewayError>;
}
