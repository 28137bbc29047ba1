//! Data models for the gateway.
//!
//! This module contains the query request and response envelopes exchanged
//! with the i2b2 cells, the user context returned by the directory and the
//! outcome of a pipeline run.

use crate::error::GatewayError;
use crate::pipeline::timing::TimingReport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The only request type the gateway accepts.
pub const RUN_QUERY_FROM_DEFINITION: &str = "CRC_QRY_runQueryInstance_fromQueryDefinition";

/// Output type used by requests built on the client side.
pub const DEFAULT_OUTPUT_TYPE: &str = "PATIENT_COUNT_XML";

/// Output types forced on every tagged query before local execution.
pub const TAGGED_QUERY_OUTPUT_TYPES: [&str; 2] = ["PATIENTSET", "PATIENT_COUNT_XML"];

/// Result type of the single instance kept in an encrypted-count response.
pub const ENCRYPTED_COUNT_RESULT_TYPE: &str = "PATIENT_COUNT_XML";

/// Aggregation capability granted to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// One encrypted count per site.
    AggregatedPerSite,
    /// One obfuscated count per site.
    ObfuscatedPerSite,
    /// A single encrypted count over all sites.
    AggregatedTotal,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::AggregatedPerSite => write!(f, "AGGREGATED_PER_SITE"),
            QueryType::ObfuscatedPerSite => write!(f, "OBFUSCATED_PER_SITE"),
            QueryType::AggregatedTotal => write!(f, "AGGREGATED_TOTAL"),
        }
    }
}

/// Credentials part of the message header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub domain: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Message header, forwarded as-is to the cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub security: Security,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Any other header field, kept opaque.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single search term of a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Concept path, or a sensitive/tagged key.
    pub item_key: String,
    #[serde(default)]
    pub item_is_synonym: bool,
}

/// A group of items; items are OR-ed, panels are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub panel_number: u32,
    #[serde(default)]
    pub panel_accuracy_scale: u32,
    #[serde(default)]
    pub invert: bool,
    pub items: Vec<Item>,
}

/// The query definition: an ordered list of panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDocument {
    pub query_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_description: Option<String>,
    #[serde(default)]
    pub specificity_scale: u32,
    pub panels: Vec<Panel>,
}

/// A requested result output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_index: Option<u32>,
}

/// A "run query instance from query definition" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message_header: MessageHeader,
    pub request_type: String,
    pub query_definition: QueryDocument,
    #[serde(default)]
    pub result_output_list: Vec<ResultOutput>,
}

impl QueryRequest {
    /// Parse an incoming request, rejecting anything but a query from a
    /// query definition.
    pub fn parse(input: &str) -> Result<Self, GatewayError> {
        let request: QueryRequest =
            serde_json::from_str(input).map_err(|e| GatewayError::MalformedInput {
                reason: "could not decode query request".to_string(),
                source: Some(e),
            })?;

        if request.request_type != RUN_QUERY_FROM_DEFINITION {
            return Err(GatewayError::malformed(format!(
                "only query from query definition supported, got: {}",
                request.request_type
            )));
        }

        Ok(request)
    }

    /// Build a request on the client side from item keys grouped by panel.
    pub fn build(header: MessageHeader, query_name: &str, item_keys: Vec<Vec<String>>) -> Self {
        let panels = item_keys
            .into_iter()
            .enumerate()
            .map(|(idx, keys)| Panel {
                panel_number: idx as u32 + 1,
                panel_accuracy_scale: 0,
                invert: false,
                items: keys
                    .into_iter()
                    .map(|item_key| Item {
                        item_key,
                        item_is_synonym: false,
                    })
                    .collect(),
            })
            .collect();

        Self {
            message_header: header,
            request_type: RUN_QUERY_FROM_DEFINITION.to_string(),
            query_definition: QueryDocument {
                query_name: query_name.to_string(),
                query_id: Some(query_name.to_string()),
                query_description: Some(format!("Query generated by the gateway client: {}", query_name)),
                specificity_scale: 0,
                panels,
            },
            result_output_list: vec![ResultOutput {
                name: DEFAULT_OUTPUT_TYPE.to_string(),
                priority_index: Some(1),
            }],
        }
    }

    pub fn query_name(&self) -> &str {
        &self.query_definition.query_name
    }

    /// Reset the result output list to the given output types.
    pub fn set_output_types(&mut self, names: &[&str]) {
        self.result_output_list.clear();
        self.result_output_list
            .extend(names.iter().map(|name| ResultOutput {
                name: name.to_string(),
                priority_index: None,
            }));
    }

    pub fn output_type_names(&self) -> Vec<&str> {
        self.result_output_list
            .iter()
            .map(|o| o.name.as_str())
            .collect()
    }
}

/// A query written on the client side: item keys grouped by panel.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientQuery {
    pub message_header: MessageHeader,
    pub query_name: String,
    pub panels: Vec<Vec<String>>,
}

impl ClientQuery {
    pub fn parse(input: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(input).map_err(|e| GatewayError::MalformedInput {
            reason: "could not decode client query".to_string(),
            source: Some(e),
        })
    }

    pub fn into_request(self) -> QueryRequest {
        QueryRequest::build(self.message_header, &self.query_name, self.panels)
    }
}

/// User information returned by the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub authenticated: bool,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Key the aggregate is encrypted under.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Patient identifiers and their encrypted dummy flags, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientSet {
    pub patient_ids: Vec<String>,
    pub dummy_flags: Vec<String>,
}

/// One result instance of a query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInstance {
    pub result_instance_id: String,
    pub result_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The encrypted aggregate attached to a completed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedResult {
    pub public_key: String,
    pub aggregate: String,
    pub timings: TimingReport,
}

/// Response of the query execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub query_name: String,
    #[serde(default)]
    pub patient_set_id: Option<String>,
    #[serde(default)]
    pub result_instances: Vec<ResultInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_result: Option<EncryptedResult>,
}

impl QueryResponse {
    /// Keep only a count instance, with its clear size removed.
    pub fn reset_result_instances_to_encrypted_count(&mut self) {
        let instance_id = self
            .result_instances
            .iter()
            .find(|r| r.result_type == ENCRYPTED_COUNT_RESULT_TYPE)
            .or_else(|| self.result_instances.first())
            .map(|r| r.result_instance_id.clone())
            .unwrap_or_else(|| "0".to_string());

        self.result_instances = vec![ResultInstance {
            result_instance_id: instance_id,
            result_type: ENCRYPTED_COUNT_RESULT_TYPE.to_string(),
            set_size: None,
            description: Some("Encrypted patient count".to_string()),
        }];
    }

    pub fn set_query_results(&mut self, public_key: &str, aggregate: String, timings: TimingReport) {
        self.encrypted_result = Some(EncryptedResult {
            public_key: public_key.to_string(),
            aggregate,
            timings,
        });
    }
}

/// Why a query was turned away before any protocol ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotAuthenticated,
    MissingPublicKey,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotAuthenticated => write!(f, "authentication failed"),
            RejectionReason::MissingPublicKey => write!(f, "no public key registered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub username: String,
    pub reason: RejectionReason,
    pub timings: TimingReport,
}

/// Terminal state of a pipeline run that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Tagged, executed and aggregated.
    Completed(QueryResponse),
    /// Connectivity test query, forwarded unmodified.
    Bypassed(QueryResponse),
    Rejected(Rejection),
}

impl PipelineOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            PipelineOutcome::Completed(_) => "completed",
            PipelineOutcome::Bypassed(_) => "bypassed",
            PipelineOutcome::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MessageHeader {
        MessageHeader {
            security: Security {
                domain: "i2b2demo".to_string(),
                username: "demo".to_string(),
                password: "demouser".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_build_numbers_panels() {
        let request = QueryRequest::build(
            header(),
            "q1",
            vec![
                vec!["\\\\A\\".to_string(), "\\\\B\\".to_string()],
                vec!["\\\\C\\".to_string()],
            ],
        );

        let panels = &request.query_definition.panels;
        assert_eq!(panels.len(), 2);
        assert_eq!(panels[0].panel_number, 1);
        assert_eq!(panels[1].panel_number, 2);
        assert_eq!(panels[0].items[1].item_key, "\\\\B\\");
        assert!(!panels[0].items[0].item_is_synonym);
        assert_eq!(request.output_type_names(), vec![DEFAULT_OUTPUT_TYPE]);
        assert_eq!(request.query_name(), "q1");
    }

    #[test]
    fn test_client_query_becomes_request() {
        let json = r#"{
            "message_header": {"security": {"domain": "i2b2demo", "username": "demo"}},
            "query_name": "cohort",
            "panels": [["\\\\A\\"], ["\\\\B\\", "\\\\C\\"]]
        }"#;

        let request = ClientQuery::parse(json).unwrap().into_request();

        assert_eq!(request.request_type, RUN_QUERY_FROM_DEFINITION);
        assert_eq!(request.query_name(), "cohort");
        assert_eq!(request.query_definition.panels[1].panel_number, 2);
        assert_eq!(request.query_definition.panels[1].items[1].item_key, "\\\\C\\");
        assert_eq!(request.output_type_names(), vec![DEFAULT_OUTPUT_TYPE]);
        assert_eq!(request.message_header.security.username, "demo");

        let err = ClientQuery::parse(r#"{"query_name": "cohort"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedInput { source: Some(_), .. }));
    }

    #[test]
    fn test_parse_round_trip_of_built_request() {
        let request = QueryRequest::build(header(), "q1", vec![vec!["\\\\A\\".to_string()]]);
        let json = serde_json::to_string(&request).unwrap();
        let parsed = QueryRequest::parse(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_parse_rejects_other_request_types() {
        let mut request = QueryRequest::build(header(), "q1", vec![]);
        request.request_type = "CRC_QRY_getQueryMasterList_fromUserId".to_string();
        let json = serde_json::to_string(&request).unwrap();

        let err = QueryRequest::parse(&json).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedInput { source: None, .. }));
        assert!(err.to_string().contains("getQueryMasterList"));
    }

    #[test]
    fn test_parse_attaches_decode_cause() {
        let err = QueryRequest::parse("{\"message_header\":").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedInput { source: Some(_), .. }));
    }

    #[test]
    fn test_header_keeps_unknown_fields() {
        let json = r#"{"security":{"domain":"d","username":"u"},"sending_application":{"name":"shrine"}}"#;
        let header: MessageHeader = serde_json::from_str(json).unwrap();
        assert!(header.extra.contains_key("sending_application"));
        let back = serde_json::to_value(&header).unwrap();
        assert_eq!(back["sending_application"]["name"], "shrine");
    }

    #[test]
    fn test_set_output_types_replaces_list() {
        let mut request = QueryRequest::build(header(), "q1", vec![]);
        request.set_output_types(&TAGGED_QUERY_OUTPUT_TYPES);
        assert_eq!(
            request.output_type_names(),
            vec!["PATIENTSET", "PATIENT_COUNT_XML"]
        );
    }

    #[test]
    fn test_reset_to_encrypted_count() {
        let mut response = QueryResponse {
            query_name: "q1".to_string(),
            patient_set_id: Some("42".to_string()),
            result_instances: vec![
                ResultInstance {
                    result_instance_id: "7".to_string(),
                    result_type: "PATIENTSET".to_string(),
                    set_size: Some(12),
                    description: None,
                },
                ResultInstance {
                    result_instance_id: "8".to_string(),
                    result_type: "PATIENT_COUNT_XML".to_string(),
                    set_size: Some(12),
                    description: None,
                },
            ],
            encrypted_result: None,
        };

        response.reset_result_instances_to_encrypted_count();

        assert_eq!(response.result_instances.len(), 1);
        assert_eq!(response.result_instances[0].result_instance_id, "8");
        assert_eq!(response.result_instances[0].set_size, None);
    }

    #[test]
    fn test_query_type_display() {
        assert_eq!(QueryType::AggregatedPerSite.to_string(), "AGGREGATED_PER_SITE");
        assert_eq!(
            serde_json::to_string(&QueryType::AggregatedTotal).unwrap(),
            "\"AGGREGATED_TOTAL\""
        );
    }
}
