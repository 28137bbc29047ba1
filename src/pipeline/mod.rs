//! The query pipeline.
//!
//! A query goes through authentication, permission resolution, term
//! classification, tagging, local execution, patient set retrieval and
//! secure aggregation, in that order and without going back. All per-query
//! state lives in a [`QueryContext`].

pub mod dispatcher;
pub mod orchestrator;
pub mod retry;
pub mod timing;

pub use orchestrator::{Pipeline, PipelineServices};
pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::fmt;
use timing::Timers;
use tracing::debug;

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Authenticate,
    ResolvePermission,
    Classify,
    BypassCheck,
    Tag,
    Substitute,
    LocalExecute,
    RetrievePatientSet,
    Aggregate,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Authenticate => "authenticate",
            Stage::ResolvePermission => "resolve permission",
            Stage::Classify => "classify",
            Stage::BypassCheck => "bypass check",
            Stage::Tag => "tag",
            Stage::Substitute => "substitute",
            Stage::LocalExecute => "local execute",
            Stage::RetrievePatientSet => "retrieve patient set",
            Stage::Aggregate => "aggregate",
            Stage::Assemble => "assemble",
        };
        write!(f, "{}", name)
    }
}

/// State of one query run.
#[derive(Debug)]
pub struct QueryContext {
    pub query_name: String,
    pub timers: Timers,
    stage: Stage,
}

impl QueryContext {
    pub fn new(query_name: &str) -> Self {
        Self {
            query_name: query_name.to_string(),
            timers: Timers::new(),
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to the next stage. Stages only move forward.
    pub fn enter(&mut self, stage: Stage) {
        debug_assert!(stage >= self.stage, "{} after {}", stage, self.stage);
        debug!("Query {}: {} -> {}", self.query_name, self.stage, stage);
        self.stage = stage;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory doubles for the pipeline ports.

    use crate::error::{GatewayError, Service};
    use crate::models::{
        MessageHeader, PatientSet, QueryRequest, QueryResponse, ResultInstance, UserContext,
    };
    use crate::ports::{
        AggregationProtocol, DirectoryService, ProtocolReply, QueryExecutor, TaggingProtocol,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct MockDirectory {
        pub user: UserContext,
        pub calls: AtomicUsize,
    }

    impl MockDirectory {
        pub fn with_roles(roles: &[&str]) -> Self {
            Self {
                user: UserContext {
                    authenticated: true,
                    username: "demo".to_string(),
                    roles: roles.iter().map(|r| r.to_string()).collect(),
                    public_key: Some("PUBKEY".to_string()),
                },
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DirectoryService for MockDirectory {
        async fn user_information(&self, _header: &MessageHeader) -> Result<UserContext, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.user.clone())
        }
    }

    pub struct MockExecutor {
        pub queries: Mutex<Vec<QueryRequest>>,
        pub patient_set_requests: Mutex<Vec<(String, bool)>>,
        pub dummy_flags: Vec<String>,
    }

    impl MockExecutor {
        pub fn new(dummy_flags: &[&str]) -> Self {
            Self {
                queries: Mutex::new(Vec::new()),
                patient_set_requests: Mutex::new(Vec::new()),
                dummy_flags: dummy_flags.iter().map(|f| f.to_string()).collect(),
            }
        }

        pub fn last_query(&self) -> Option<QueryRequest> {
            self.queries.lock().unwrap().last().cloned()
        }

        pub fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl QueryExecutor for MockExecutor {
        async fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, GatewayError> {
            self.queries.lock().unwrap().push(request.clone());
            Ok(QueryResponse {
                query_name: request.query_name().to_string(),
                patient_set_id: Some("42".to_string()),
                result_instances: vec![ResultInstance {
                    result_instance_id: "8".to_string(),
                    result_type: "PATIENT_COUNT_XML".to_string(),
                    set_size: Some(self.dummy_flags.len() as u64),
                    description: None,
                }],
                encrypted_result: None,
            })
        }

        async fn patient_set(
            &self,
            _header: &MessageHeader,
            patient_set_id: &str,
            include_obfuscated: bool,
        ) -> Result<PatientSet, GatewayError> {
            self.patient_set_requests
                .lock()
                .unwrap()
                .push((patient_set_id.to_string(), include_obfuscated));
            Ok(PatientSet {
                patient_ids: (1..=self.dummy_flags.len()).map(|i| i.to_string()).collect(),
                dummy_flags: self.dummy_flags.clone(),
            })
        }
    }

    /// Returns the configured tokens; fails transiently the first
    /// `failures` times.
    pub struct MockTagging {
        pub tokens: Vec<String>,
        pub requests: Mutex<Vec<Vec<String>>>,
        pub failures: AtomicUsize,
    }

    impl MockTagging {
        pub fn returning(tokens: &[&str]) -> Self {
            Self {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                requests: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaggingProtocol for MockTagging {
        async fn compute_tags(
            &self,
            _query_name: &str,
            terms: &[String],
        ) -> Result<ProtocolReply<Vec<String>>, GatewayError> {
            self.requests.lock().unwrap().push(terms.to_vec());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GatewayError::timeout(Service::Tagging, 1));
            }

            let mut timings = BTreeMap::new();
            timings.insert("DDTRequestTime".to_string(), 5.0);
            Ok(ProtocolReply {
                value: self.tokens.clone(),
                timings,
            })
        }
    }

    pub struct MockAggregation {
        pub requests: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockAggregation {
        pub fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AggregationProtocol for MockAggregation {
        async fn aggregate(
            &self,
            _query_name: &str,
            public_key: &str,
            dummy_flags: &[String],
        ) -> Result<ProtocolReply<String>, GatewayError> {
            self.requests
                .lock()
                .unwrap()
                .push((public_key.to_string(), dummy_flags.to_vec()));

            let mut timings = BTreeMap::new();
            timings.insert("AggregationTime".to_string(), 7.0);
            Ok(ProtocolReply {
                value: format!("AGG({})", dummy_flags.join("+")),
                timings,
            })
        }
    }
}
