//! Directory client (PM cell).

use super::JsonClient;
use crate::config::EndpointConfig;
use crate::error::{GatewayError, Service};
use crate::models::{MessageHeader, UserContext};
use crate::ports::DirectoryService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct UserInfoRequest<'a> {
    message_header: &'a MessageHeader,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    authenticated: bool,
    username: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    public_key: Option<String>,
}

impl From<UserInfoResponse> for UserContext {
    fn from(r: UserInfoResponse) -> Self {
        UserContext {
            authenticated: r.authenticated,
            username: r.username,
            roles: r.roles,
            // An empty key is as good as none.
            public_key: r.public_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

pub struct PmCellClient {
    client: JsonClient,
}

impl PmCellClient {
    pub fn new(config: &EndpointConfig) -> Result<Self, GatewayError> {
        let client = JsonClient::new(Service::Directory, &config.url, config.timeout_seconds)?;
        debug!("PM cell at {}", client.base_url());
        Ok(Self { client })
    }
}

#[async_trait]
impl DirectoryService for PmCellClient {
    async fn user_information(&self, header: &MessageHeader) -> Result<UserContext, GatewayError> {
        let response: UserInfoResponse = self
            .client
            .post("getServices", &UserInfoRequest { message_header: header })
            .await?;

        debug!(
            "User {} authenticated={} roles={:?}",
            response.username, response.authenticated, response.roles
        );

        Ok(response.into())
    }
}
