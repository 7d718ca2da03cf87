//! Control-panel API client for mailbox provisioning.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::ManagementAccount;
use crate::error::ApiError;
use crate::pool::{SessionKey, SessionRegistry, bounded};
use crate::transport::{ApiMethod, ApiRequest, ApiResponse, ManagementConnector, ManagementTransport};

type ManagementSession = Box<dyn ManagementTransport>;

/// One mailbox as reported by the control panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagementAccountRecord {
    pub email_address: String,
    pub disk_used: String,
    /// `"unlimited"` or a size in megabytes
    pub disk_quota: String,
}

#[derive(Clone)]
pub struct ManagementClient {
    registry: SessionRegistry<ManagementSession>,
    connector: Arc<dyn ManagementConnector>,
    operation_timeout: Duration,
}

impl ManagementClient {
    pub fn new(
        registry: SessionRegistry<ManagementSession>,
        connector: Arc<dyn ManagementConnector>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            operation_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry<ManagementSession> {
        &self.registry
    }

    /// `GET /execute/{module}/{function}` with `params` in the query string.
    pub async fn call(
        &self,
        key: &SessionKey,
        account: &ManagementAccount,
        module: &str,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        self.execute(key, account, ApiMethod::Get, module, function, params)
            .await
    }

    /// `POST /execute/{module}/{function}` with `params` form-encoded, for
    /// calls that carry secrets.
    pub async fn call_form(
        &self,
        key: &SessionKey,
        account: &ManagementAccount,
        module: &str,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        self.execute(key, account, ApiMethod::Post, module, function, params)
            .await
    }

    async fn execute(
        &self,
        key: &SessionKey,
        account: &ManagementAccount,
        method: ApiMethod,
        module: &str,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let connector = Arc::clone(&self.connector);
        let timeout = self.operation_timeout;
        let mut guard = self
            .registry
            .acquire(key, || async move {
                bounded(timeout, connector.connect(account)).await
            })
            .await?;

        let request = ApiRequest {
            method,
            module,
            function,
            params,
        };
        let result = match guard.transport() {
            Ok(transport) => bounded(timeout, transport.execute(request))
                .await
                .map_err(ApiError::from)
                .and_then(parse_response),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(value) => {
                guard.touch();
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Management call {}/{} failed: {}", module, function, e);
                if e.evicts_session() {
                    guard.evict().await;
                }
                Err(e)
            }
        }
    }

    /// Create a mailbox under the account's domain. `quota_mb = 0` means
    /// unlimited.
    pub async fn create_account(
        &self,
        account: &ManagementAccount,
        email: &str,
        password: &str,
        quota_mb: u64,
    ) -> Result<(), ApiError> {
        let params = [
            ("email", local_part(email).to_string()),
            ("password", password.to_string()),
            ("quota", quota_mb.to_string()),
            ("domain", account.domain.clone()),
        ];
        let response = self
            .call_form(
                &SessionKey::management(account),
                account,
                "Email",
                "add_pop",
                &params,
            )
            .await?;
        ensure_success(response)?;
        tracing::info!("Created mailbox {}@{}", local_part(email), account.domain);
        Ok(())
    }

    pub async fn list_accounts(
        &self,
        account: &ManagementAccount,
    ) -> Result<Vec<ManagementAccountRecord>, ApiError> {
        let response = self
            .call(
                &SessionKey::management(account),
                account,
                "Email",
                "list_pops_with_disk",
                &[],
            )
            .await?;
        let response = ensure_success(response)?;

        let records = match response.get("data") {
            Some(Value::Array(entries)) => entries.iter().filter_map(parse_record).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ApiError::Malformed(format!(
                    "expected a list of mailboxes, got {}",
                    other
                )));
            }
        };
        Ok(records)
    }

    pub async fn delete_account(
        &self,
        account: &ManagementAccount,
        email: &str,
    ) -> Result<(), ApiError> {
        let params = [
            ("email", local_part(email).to_string()),
            ("domain", account.domain.clone()),
        ];
        let response = self
            .call_form(
                &SessionKey::management(account),
                account,
                "Email",
                "delete_pop",
                &params,
            )
            .await?;
        ensure_success(response)?;
        tracing::info!("Deleted mailbox {}@{}", local_part(email), account.domain);
        Ok(())
    }
}

fn parse_response(response: ApiResponse) -> Result<Value, ApiError> {
    if !(200..300).contains(&response.status) {
        return Err(ApiError::Status {
            status: response.status,
            body: response.body,
        });
    }
    serde_json::from_str(&response.body).map_err(|e| ApiError::Malformed(e.to_string()))
}

/// Check the UAPI envelope: `status: 1` is success, anything else carries
/// the panel's error strings.
fn ensure_success(response: Value) -> Result<Value, ApiError> {
    match response.get("status").and_then(Value::as_i64) {
        Some(1) => Ok(response),
        Some(_) => {
            let mut errors: Vec<String> = response
                .get("errors")
                .and_then(Value::as_array)
                .map(|errors| {
                    errors
                        .iter()
                        .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            if errors.is_empty() {
                errors.push("unknown error".to_string());
            }
            Err(ApiError::Rejected(errors))
        }
        None => Err(ApiError::Malformed("missing status field".to_string())),
    }
}

fn parse_record(entry: &Value) -> Option<ManagementAccountRecord> {
    Some(ManagementAccountRecord {
        email_address: entry.get("email")?.as_str()?.to_string(),
        disk_used: scalar_to_string(entry.get("diskused")),
        disk_quota: scalar_to_string(entry.get("diskquota")),
    })
}

/// The panel reports sizes as strings or numbers depending on version
fn scalar_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}
