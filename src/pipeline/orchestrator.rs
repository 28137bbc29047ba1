//! Sequencing of one query through the pipeline stages.

use super::dispatcher::AggregationDispatcher;
use super::retry::{with_retries, RetryPolicy};
use super::{QueryContext, Stage};
use crate::auth::resolve_query_type;
use crate::cells::{CrcCellClient, PmCellClient};
use crate::config::{Config, QueryConfig};
use crate::error::{GatewayError, PipelineFailure, Service};
use crate::models::{PipelineOutcome, QueryRequest, Rejection, RejectionReason};
use crate::ports::{AggregationProtocol, DirectoryService, QueryExecutor, TaggingProtocol};
use crate::query::{override_output_types, substitute, TermClassifier};
use crate::unlynx::UnlynxClient;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The external collaborators a pipeline runs against.
pub struct PipelineServices {
    pub directory: Arc<dyn DirectoryService>,
    pub executor: Arc<dyn QueryExecutor>,
    pub tagging: Arc<dyn TaggingProtocol>,
    pub aggregation: Arc<dyn AggregationProtocol>,
}

impl PipelineServices {
    /// HTTP clients for the configured endpoints.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let unlynx = Arc::new(UnlynxClient::new(&config.unlynx)?);
        Ok(Self {
            directory: Arc::new(PmCellClient::new(&config.directory)?),
            executor: Arc::new(CrcCellClient::new(&config.crc)?),
            tagging: unlynx.clone(),
            aggregation: unlynx,
        })
    }
}

pub struct Pipeline {
    directory: Arc<dyn DirectoryService>,
    executor: Arc<dyn QueryExecutor>,
    tagging: Arc<dyn TaggingProtocol>,
    dispatcher: AggregationDispatcher,
    classifier: TermClassifier,
    test_marker: String,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        services: PipelineServices,
        query_config: &QueryConfig,
        retry: RetryPolicy,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            directory: services.directory,
            executor: services.executor,
            tagging: services.tagging,
            dispatcher: AggregationDispatcher::new(services.aggregation, retry.clone()),
            classifier: TermClassifier::new(query_config)?,
            test_marker: query_config.test_marker.clone(),
            retry,
        })
    }

    /// Run a query to completion.
    ///
    /// Rejections and test-query bypasses are regular outcomes; any other
    /// abort comes back as a [`PipelineFailure`] with the timings so far.
    pub async fn execute(&self, mut request: QueryRequest) -> Result<PipelineOutcome, PipelineFailure> {
        let mut ctx = QueryContext::new(request.query_name());
        ctx.timers.start_overall();

        match self.run_stages(&mut ctx, &mut request).await {
            Ok(outcome) => Ok(outcome),
            Err(source) => {
                ctx.timers.stop_step();
                ctx.timers.stop_overall();
                error!(
                    "Query {} failed at stage {}: {}",
                    ctx.query_name,
                    ctx.stage(),
                    source
                );
                Err(PipelineFailure {
                    query_name: ctx.query_name.clone(),
                    stage: ctx.stage(),
                    source,
                    timings: ctx.timers.generate_report(),
                })
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut QueryContext,
        request: &mut QueryRequest,
    ) -> Result<PipelineOutcome, GatewayError> {
        let directory: &dyn DirectoryService = self.directory.as_ref();
        let executor: &dyn QueryExecutor = self.executor.as_ref();

        // User information: authentication, roles and public key.
        ctx.enter(Stage::Authenticate);
        ctx.timers.start_step("User information retrieval");
        let header = &request.message_header;
        let user = with_retries(&self.retry, Service::Directory, move || {
            directory.user_information(header)
        })
        .await?;

        let rejection = if !user.authenticated {
            Some(RejectionReason::NotAuthenticated)
        } else if user.public_key.is_none() {
            Some(RejectionReason::MissingPublicKey)
        } else {
            None
        };
        if let Some(reason) = rejection {
            warn!("Rejected query {} of user {}: {}", ctx.query_name, user.username, reason);
            ctx.timers.stop_step();
            ctx.timers.stop_overall();
            return Ok(PipelineOutcome::Rejected(Rejection {
                username: user.username,
                reason,
                timings: ctx.timers.generate_report(),
            }));
        }
        let public_key = user.public_key.unwrap_or_default();

        ctx.enter(Stage::ResolvePermission);
        let query_type = resolve_query_type(&user.roles)?;
        info!("User {} runs query {} as {}", user.username, ctx.query_name, query_type);
        ctx.timers.stop_step();

        ctx.enter(Stage::Classify);
        ctx.timers.start_step("Query parsing/splitting");
        let extracted = self.classifier.extract(&request.query_definition);
        ctx.timers.stop_step();

        ctx.enter(Stage::BypassCheck);
        if extracted.contains(&self.test_marker) {
            info!("Intercepted status query ({}).", ctx.query_name);
            substitute(
                &self.classifier,
                &mut request.query_definition,
                &extracted,
                &extracted.ciphertexts(),
            );

            ctx.enter(Stage::LocalExecute);
            let forwarded: &QueryRequest = request;
            let response = with_retries(&self.retry, Service::QueryExecution, move || {
                executor.run_query(forwarded)
            })
            .await?;
            ctx.timers.stop_overall();
            return Ok(PipelineOutcome::Bypassed(response));
        }

        ctx.enter(Stage::Tag);
        let tokens = if extracted.is_empty() {
            info!("No encrypted terms in query {}, skipping tagging", ctx.query_name);
            Vec::new()
        } else {
            ctx.timers.start_step("Query tagging");
            let tagging: &dyn TaggingProtocol = self.tagging.as_ref();
            let query_name = ctx.query_name.as_str();
            let terms = extracted.ciphertexts();
            let terms = terms.as_slice();
            let reply = with_retries(&self.retry, Service::Tagging, move || {
                tagging.compute_tags(query_name, terms)
            })
            .await?;
            ctx.timers.add_additional(&reply.timings);
            ctx.timers.stop_step();
            reply.value
        };

        ctx.enter(Stage::Substitute);
        ctx.timers.start_step("i2b2 query");
        let summary = substitute(&self.classifier, &mut request.query_definition, &extracted, &tokens);
        if summary.is_consistent() {
            info!("Tagged {} query terms of query {}", summary.substituted, ctx.query_name);
        } else {
            warn!(
                "Query {} runs with {} of {} terms tagged",
                ctx.query_name, summary.substituted, summary.expected
            );
        }
        override_output_types(request);

        ctx.enter(Stage::LocalExecute);
        let tagged_request: &QueryRequest = request;
        let mut response = with_retries(&self.retry, Service::QueryExecution, move || {
            executor.run_query(tagged_request)
        })
        .await?;
        ctx.timers.stop_step();

        ctx.enter(Stage::RetrievePatientSet);
        ctx.timers.start_step("i2b2 patient set retrieval");
        let patient_set_id = response
            .patient_set_id
            .clone()
            .ok_or_else(|| GatewayError::service(Service::QueryExecution, "response has no patient set id"))?;
        let header = &request.message_header;
        let set_id = patient_set_id.as_str();
        // Dummy patients are needed: their flags take part in the aggregation.
        let patient_set = with_retries(&self.retry, Service::QueryExecution, move || {
            executor.patient_set(header, set_id, true)
        })
        .await?;
        ctx.timers.stop_step();

        ctx.enter(Stage::Aggregate);
        ctx.timers.start_step("Result aggregation");
        let aggregate = self
            .dispatcher
            .dispatch(ctx, query_type, &public_key, &patient_set.dummy_flags)
            .await?;
        ctx.timers.stop_step();

        ctx.enter(Stage::Assemble);
        response.reset_result_instances_to_encrypted_count();
        ctx.timers.stop_overall();
        response.set_query_results(&public_key, aggregate, ctx.timers.generate_report());

        info!("MedCo query successful ({}).", ctx.query_name);
        Ok(PipelineOutcome::Completed(response))
    }
}
