//! Selection and invocation of the aggregation mode.

use super::retry::{with_retries, RetryPolicy};
use super::QueryContext;
use crate::error::{GatewayError, Service};
use crate::models::QueryType;
use crate::ports::AggregationProtocol;
use std::sync::Arc;
use tracing::info;

pub struct AggregationDispatcher {
    aggregation: Arc<dyn AggregationProtocol>,
    retry: RetryPolicy,
}

impl AggregationDispatcher {
    pub fn new(aggregation: Arc<dyn AggregationProtocol>, retry: RetryPolicy) -> Self {
        Self { aggregation, retry }
    }

    /// Aggregate the dummy flags of the patient set under `public_key`.
    ///
    /// Protocol timings are recorded into the query context.
    pub async fn dispatch(
        &self,
        ctx: &mut QueryContext,
        query_type: QueryType,
        public_key: &str,
        dummy_flags: &[String],
    ) -> Result<String, GatewayError> {
        match query_type {
            QueryType::AggregatedPerSite => {
                let aggregation: &dyn AggregationProtocol = self.aggregation.as_ref();
                let query_name = ctx.query_name.as_str();

                let reply = with_retries(&self.retry, Service::Aggregation, move || {
                    aggregation.aggregate(query_name, public_key, dummy_flags)
                })
                .await?;

                ctx.timers.add_additional(&reply.timings);
                info!(
                    "Aggregated {} dummy flags per site for query {}",
                    dummy_flags.len(),
                    ctx.query_name
                );
                Ok(reply.value)
            }
            QueryType::ObfuscatedPerSite | QueryType::AggregatedTotal => {
                Err(GatewayError::UnsupportedQueryType(query_type))
            }
        }
    }
}
