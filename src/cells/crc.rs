//! Query execution client (CRC cell).

use super::JsonClient;
use crate::config::EndpointConfig;
use crate::error::{GatewayError, Service};
use crate::models::{MessageHeader, PatientSet, QueryRequest, QueryResponse};
use crate::ports::QueryExecutor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct PatientSetRequest<'a> {
    message_header: &'a MessageHeader,
    patient_set_id: &'a str,
    include_obfuscated: bool,
}

#[derive(Debug, Deserialize)]
struct PatientSetResponse {
    patients: Vec<PatientEntry>,
}

#[derive(Debug, Deserialize)]
struct PatientEntry {
    patient_id: String,
    /// Encrypted dummy flag of the patient.
    dummy_flag: String,
}

impl From<PatientSetResponse> for PatientSet {
    fn from(r: PatientSetResponse) -> Self {
        let (patient_ids, dummy_flags) = r
            .patients
            .into_iter()
            .map(|p| (p.patient_id, p.dummy_flag))
            .unzip();

        PatientSet {
            patient_ids,
            dummy_flags,
        }
    }
}

pub struct CrcCellClient {
    client: JsonClient,
}

impl CrcCellClient {
    pub fn new(config: &EndpointConfig) -> Result<Self, GatewayError> {
        let client = JsonClient::new(Service::QueryExecution, &config.url, config.timeout_seconds)?;
        debug!("CRC cell at {}", client.base_url());
        Ok(Self { client })
    }
}

#[async_trait]
impl QueryExecutor for CrcCellClient {
    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, GatewayError> {
        let mut response: QueryResponse = self.client.post("request", request).await?;
        if response.query_name.is_empty() {
            response.query_name = request.query_name().to_string();
        }

        info!(
            "CRC answered query {} with {} result instance(s)",
            response.query_name,
            response.result_instances.len()
        );
        Ok(response)
    }

    async fn patient_set(
        &self,
        header: &MessageHeader,
        patient_set_id: &str,
        include_obfuscated: bool,
    ) -> Result<PatientSet, GatewayError> {
        let response: PatientSetResponse = self
            .client
            .post(
                "pdorequest",
                &PatientSetRequest {
                    message_header: header,
                    patient_set_id,
                    include_obfuscated,
                },
            )
            .await?;

        let set: PatientSet = response.into();
        debug!("Patient set {} holds {} patients", patient_set_id, set.patient_ids.len());
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_set_keeps_order() {
        let json = r#"{"patients":[
            {"patient_id":"1","dummy_flag":"F1"},
            {"patient_id":"2","dummy_flag":"F2"},
            {"patient_id":"3","dummy_flag":"F3"}
        ]}"#;

        let set: PatientSet = serde_json::from_str::<PatientSetResponse>(json).unwrap().into();

        assert_eq!(set.patient_ids, vec!["1", "2", "3"]);
        assert_eq!(set.dummy_flags, vec!["F1", "F2", "F3"]);
    }

    #[test]
    fn test_patient_set_request_shape() {
        let header = MessageHeader::default();
        let body = serde_json::to_value(PatientSetRequest {
            message_header: &header,
            patient_set_id: "42",
            include_obfuscated: true,
        })
        .unwrap();

        assert_eq!(body["patient_set_id"], "42");
        assert_eq!(body["include_obfuscated"], true);
    }
}
