//! Client of the protocol service running the distributed tagging and the
//! secure aggregation among the sites.

use crate::cells::JsonClient;
use crate::config::UnlynxConfig;
use crate::error::{GatewayError, Service};
use crate::ports::{AggregationProtocol, ProtocolReply, TaggingProtocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Extra HTTP time on top of the protocol timeout.
const HTTP_GRACE_SECONDS: u64 = 30;

/// Parameters sent with every protocol run.
#[derive(Debug, Clone, Serialize)]
struct ProtocolParameters<'a> {
    group_file: &'a str,
    entry_point_idx: usize,
    proofs: bool,
    debug_level: u8,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct TaggingRequest<'a> {
    query_name: &'a str,
    #[serde(flatten)]
    parameters: ProtocolParameters<'a>,
    encrypted_terms: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TaggingResponse {
    tagged_terms: Vec<String>,
    #[serde(default)]
    timings: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct AggregationRequest<'a> {
    query_name: &'a str,
    #[serde(flatten)]
    parameters: ProtocolParameters<'a>,
    client_public_key: &'a str,
    dummy_flags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    aggregate: String,
    #[serde(default)]
    timings: BTreeMap<String, f64>,
}

pub struct UnlynxClient {
    config: UnlynxConfig,
    tagging: JsonClient,
    aggregation: JsonClient,
}

impl UnlynxClient {
    pub fn new(config: &UnlynxConfig) -> Result<Self, GatewayError> {
        let http_timeout = config.timeout_seconds + HTTP_GRACE_SECONDS;
        Ok(Self {
            config: config.clone(),
            tagging: JsonClient::new(Service::Tagging, &config.url, http_timeout)?,
            aggregation: JsonClient::new(Service::Aggregation, &config.url, http_timeout)?,
        })
    }

    fn parameters(&self) -> ProtocolParameters<'_> {
        ProtocolParameters {
            group_file: &self.config.group_file,
            entry_point_idx: self.config.entry_point_idx,
            proofs: self.config.proofs,
            debug_level: self.config.debug_level,
            timeout_seconds: self.config.timeout_seconds,
        }
    }
}

#[async_trait]
impl TaggingProtocol for UnlynxClient {
    async fn compute_tags(
        &self,
        query_name: &str,
        terms: &[String],
    ) -> Result<ProtocolReply<Vec<String>>, GatewayError> {
        let request = TaggingRequest {
            query_name,
            parameters: self.parameters(),
            encrypted_terms: terms,
        };
        let response: TaggingResponse = self.tagging.post("tagging", &request).await?;

        info!(
            "Tagging of {} terms returned {} tags for query {}",
            terms.len(),
            response.tagged_terms.len(),
            query_name
        );

        Ok(ProtocolReply {
            value: response.tagged_terms,
            timings: response.timings,
        })
    }
}

#[async_trait]
impl AggregationProtocol for UnlynxClient {
    async fn aggregate(
        &self,
        query_name: &str,
        public_key: &str,
        dummy_flags: &[String],
    ) -> Result<ProtocolReply<String>, GatewayError> {
        let request = AggregationRequest {
            query_name,
            parameters: self.parameters(),
            client_public_key: public_key,
            dummy_flags,
        };
        let response: AggregationResponse = self.aggregation.post("aggregation", &request).await?;

        if response.aggregate.is_empty() {
            return Err(GatewayError::service(Service::Aggregation, "empty aggregate"));
        }

        info!("Aggregated {} flags for query {}", dummy_flags.len(), query_name);

        Ok(ProtocolReply {
            value: response.aggregate,
            timings: response.timings,
        })
    }
}
