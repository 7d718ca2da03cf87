//! HTTPS sessions to the control-panel UAPI endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::config::ManagementAccount;
use crate::error::TransportError;
use crate::transport::{
    ApiMethod, ApiRequest, ApiResponse, ManagementConnector, ManagementTransport, Transport,
};

/// Authenticated UAPI session. Every request carries the account's
/// `Authorization: cpanel user:token` header; reqwest keeps the underlying
/// TLS connection alive between calls.
pub struct UapiSession {
    client: Client,
    base_url: String,
}

impl UapiSession {
    pub fn new(account: &ManagementAccount, timeout: Duration) -> Result<Self, TransportError> {
        Self::with_base_url(account, account.base_url(), timeout)
    }

    /// Session against an explicit `scheme://host:port` root
    pub fn with_base_url(
        account: &ManagementAccount,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into();

        let mut authorization = HeaderValue::from_str(&account.authorization())
            .map_err(|e| TransportError::connect(&base_url, e))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::connect(&base_url, e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, module: &str, function: &str) -> String {
        format!("{}/execute/{}/{}", self.base_url, module, function)
    }
}

#[async_trait]
impl Transport for UapiSession {
    async fn close(&mut self) -> Result<(), TransportError> {
        // Idle keep-alive connections go away with the client
        Ok(())
    }
}

#[async_trait]
impl ManagementTransport for UapiSession {
    async fn execute(&mut self, request: ApiRequest<'_>) -> Result<ApiResponse, TransportError> {
        let url = self.url(request.module, request.function);

        let builder = match request.method {
            ApiMethod::Get => self.client.get(&url).query(request.params),
            ApiMethod::Post => self.client.post(&url).form(request.params),
        };

        let response = builder.send().await.map_err(|e| {
            TransportError::protocol(format!(
                "Failed to send request to {}/{}: {}",
                request.module, request.function, e
            ))
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::protocol(format!("Failed to read response: {}", e)))?;

        Ok(ApiResponse { status, body })
    }
}

/// Builds UAPI sessions. No network traffic happens until the first call.
pub struct UapiConnector {
    timeout: Duration,
}

impl UapiConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ManagementConnector for UapiConnector {
    async fn connect(
        &self,
        account: &ManagementAccount,
    ) -> Result<Box<dyn ManagementTransport>, TransportError> {
        let session = UapiSession::new(account, self.timeout)?;
        tracing::debug!("Created UAPI session for {}@{}", account.user, account.domain);
        Ok(Box::new(session))
    }
}
