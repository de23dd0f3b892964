//! Cognito identity-pool implementation of the identity exchange
//!
//! Uses the two unauthenticated identity-pool operations: `GetId` resolves
//! the pool to an identity id, `GetCredentialsForIdentity` mints the
//! temporary material for it. Both are plain JSON POSTs against the regional
//! identity endpoint, so a shared `reqwest` client is all the plumbing this
//! needs.

use super::{CredentialMaterial, CredentialsError, IdentityExchange};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const TARGET_GET_ID: &str = "AWSCognitoIdentityService.GetId";
const TARGET_GET_CREDENTIALS: &str = "AWSCognitoIdentityService.GetCredentialsForIdentity";

/// Identity exchange backed by a Cognito identity pool.
pub struct CognitoIdentityExchange {
    http: Client,
    /// Endpoint override for tests; production derives it from the region.
    endpoint_override: Option<String>,
}

impl CognitoIdentityExchange {
    pub fn new() -> Result<Self, CredentialsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CredentialsError::ExchangeFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint_override: None,
        })
    }

    /// Point the exchange at an arbitrary endpoint instead of the regional
    /// Cognito service.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, CredentialsError> {
        let mut exchange = Self::new()?;
        exchange.endpoint_override = Some(endpoint.into());
        Ok(exchange)
    }

    fn endpoint(&self, region: &str) -> String {
        match &self.endpoint_override {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://cognito-identity.{region}.amazonaws.com/"),
        }
    }

    async fn call(&self, region: &str, target: &str, body: Value) -> Result<Value, CredentialsError> {
        let response = self
            .http
            .post(self.endpoint(region))
            .header("content-type", AMZ_JSON)
            .header("x-amz-target", target)
            .json(&body)
            .send()
            .await
            .map_err(|e| CredentialsError::ExchangeFailed {
                reason: format!("{target} request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CredentialsError::ExchangeFailed {
                reason: format!("{target} returned {status}: {detail}"),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CredentialsError::ExchangeFailed {
                reason: format!("{target} returned malformed JSON: {e}"),
            })
    }
}

#[async_trait]
impl IdentityExchange for CognitoIdentityExchange {
    async fn fetch_temporary_credentials(
        &self,
        identity_pool_id: &str,
        region: &str,
    ) -> Result<CredentialMaterial, CredentialsError> {
        let id_response = self
            .call(
                region,
                TARGET_GET_ID,
                json!({ "IdentityPoolId": identity_pool_id }),
            )
            .await?;
        let identity_id = id_response["IdentityId"]
            .as_str()
            .ok_or(CredentialsError::MissingField("IdentityId"))?;

        debug!(identity_id, "resolved pool identity");

        let creds_response = self
            .call(
                region,
                TARGET_GET_CREDENTIALS,
                json!({ "IdentityId": identity_id }),
            )
            .await?;
        let credentials = &creds_response["Credentials"];

        let access_key_id = credentials["AccessKeyId"]
            .as_str()
            .ok_or(CredentialsError::MissingField("AccessKeyId"))?;
        let secret_access_key = credentials["SecretKey"]
            .as_str()
            .ok_or(CredentialsError::MissingField("SecretKey"))?;
        let session_token = credentials["SessionToken"]
            .as_str()
            .ok_or(CredentialsError::MissingField("SessionToken"))?;

        Ok(CredentialMaterial {
            region: region.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.to_string(),
        })
    }
}
