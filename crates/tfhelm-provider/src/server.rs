//! Plugin protocol over stdio
//!
//! One JSON request per line on stdin, one JSON response per line on
//! stdout:
//!
//! ```text
//! -> {"id": 1, "method": "plan", "params": {"resource": "helm_chart", "prior": null, "config": {...}}}
//! <- {"id": 1, "result": {"action": "create", "planned_state": {...}}}
//! <- {"id": 2, "error": {"code": "not_configured", "message": "provider is not configured"}}
//! ```
//!
//! Methods: `schema`, `configure`, `plan`, `apply`, `read`, `import`.
//! Requests are handled one at a time, in order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::error::{ProviderError, Result};
use crate::provider::{ApplyFailure, Provider};

/// Incoming request
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error payload of a failed request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// State left behind by a failed apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Map<String, Value>>,
}

impl ErrorBody {
    fn from_error(err: &ProviderError) -> Self {
        let help = match err {
            ProviderError::Config { help, .. } => help.clone(),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            help,
            state: None,
        }
    }
}

impl From<ApplyFailure> for ErrorBody {
    fn from(failure: ApplyFailure) -> Self {
        Self {
            state: failure.state,
            ..Self::from_error(&failure.error)
        }
    }
}

impl From<ProviderError> for ErrorBody {
    fn from(err: ProviderError) -> Self {
        Self::from_error(&err)
    }
}

/// Outgoing response
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigureParams {
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
struct PlanParams {
    resource: String,
    #[serde(default)]
    prior: Option<Map<String, Value>>,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApplyParams {
    resource: String,
    #[serde(default)]
    prior: Option<Map<String, Value>>,
    #[serde(default)]
    planned: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    resource: String,
    state: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    resource: String,
    id: String,
}

fn params<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|e| ProviderError::protocol(format!("invalid {} params: {}", method, e)))
}

/// Handle one request
pub async fn handle(provider: &mut Provider, request: Request) -> Response {
    let Request { id, method, params: raw } = request;
    debug!(method = %method, "handling request");

    let outcome: std::result::Result<Value, ErrorBody> = match method.as_str() {
        "schema" => serde_json::to_value(provider.schema()).map_err(|e| ProviderError::from(e).into()),
        "configure" => match params::<ConfigureParams>(&method, raw) {
            Ok(p) => provider
                .configure(&p.config)
                .await
                .map(|()| json!({}))
                .map_err(ErrorBody::from),
            Err(e) => Err(e.into()),
        },
        "plan" => params::<PlanParams>(&method, raw)
            .and_then(|p| provider.plan(&p.resource, p.prior.as_ref(), p.config.as_ref()))
            .and_then(|plan| serde_json::to_value(plan).map_err(ProviderError::from))
            .map_err(ErrorBody::from),
        "apply" => match params::<ApplyParams>(&method, raw) {
            Ok(p) => provider
                .apply(&p.resource, p.prior.as_ref(), p.planned.as_ref())
                .await
                .map(|state| json!({ "state": state }))
                .map_err(ErrorBody::from),
            Err(e) => Err(e.into()),
        },
        "read" => match params::<ReadParams>(&method, raw) {
            Ok(p) => provider
                .read(&p.resource, &p.state)
                .await
                .map(|state| json!({ "state": state }))
                .map_err(ErrorBody::from),
            Err(e) => Err(e.into()),
        },
        "import" => match params::<ImportParams>(&method, raw) {
            Ok(p) => provider
                .import(&p.resource, &p.id)
                .await
                .map(|state| json!({ "state": state }))
                .map_err(ErrorBody::from),
            Err(e) => Err(e.into()),
        },
        other => Err(ProviderError::protocol(format!("unknown method {:?}", other)).into()),
    };

    match outcome {
        Ok(result) => Response::ok(id, result),
        Err(body) => {
            warn!(method = %method, code = %body.code, "{}", body.message);
            Response::err(id, body)
        }
    }
}

/// Parse one line into a request
pub fn parse_request(line: &str) -> Result<Request> {
    serde_json::from_str(line)
        .map_err(|e| ProviderError::protocol(format!("malformed request: {}", e)))
}

/// Serve requests until the reader reaches end of input
pub async fn serve<R, W>(provider: &mut Provider, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match parse_request(line) {
            Ok(request) => handle(provider, request).await,
            Err(e) => {
                error!(error = %e, "rejecting request");
                Response::err(Value::Null, e.into())
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    debug!("input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::{HelmClient, MockHelmClient, ReleaseStatus};
    use crate::resources::testing;

    async fn exchange(provider: &mut Provider, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(provider, input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_schema_and_unknown_method() {
        let mut provider = Provider::new();
        let responses = exchange(
            &mut provider,
            "{\"id\":1,\"method\":\"schema\"}\n\n{\"id\":2,\"method\":\"destroy\"}\n",
        )
        .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert!(responses[0]["result"]["resources"]["helm_chart"].is_object());
        assert_eq!(responses[1]["error"]["code"], "protocol");
    }

    #[tokio::test]
    async fn test_malformed_line() {
        let mut provider = Provider::new();
        let responses = exchange(&mut provider, "not json\n").await;
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], "protocol");
    }

    #[tokio::test]
    async fn test_apply_before_configure() {
        let mut provider = Provider::new();
        let responses = exchange(
            &mut provider,
            r#"{"id":"a","method":"read","params":{"resource":"helm_chart","state":{"id":"web"}}}"#,
        )
        .await;
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[0]["error"]["code"], "not_configured");
    }

    #[tokio::test]
    async fn test_plan_and_apply() {
        let home = tempfile::tempdir().unwrap();
        let mut provider = Provider::with_meta(testing::meta(home.path(), MockHelmClient::new()));
        let input = concat!(
            r#"{"id":1,"method":"plan","params":{"resource":"helm_chart","config":{"name":"web","chart":"stable/nginx"}}}"#,
            "\n",
            r#"{"id":2,"method":"apply","params":{"resource":"helm_chart","planned":{"name":"web","chart":"stable/nginx"}}}"#,
            "\n",
        );
        let responses = exchange(&mut provider, input).await;
        assert_eq!(responses[0]["result"]["action"], "create");
        assert_eq!(responses[1]["result"]["state"]["id"], "web");
        assert_eq!(responses[1]["result"]["state"]["metadata"][0]["status"], "DEPLOYED");
    }

    #[tokio::test]
    async fn test_failed_apply_reports_state() {
        let home = tempfile::tempdir().unwrap();
        let helm = MockHelmClient::new();
        helm.fail_next_install(ReleaseStatus::PendingInstall);
        let mut provider = Provider::with_meta(testing::meta(home.path(), helm));
        let apply = r#"{"id":1,"method":"apply","params":{"resource":"helm_chart","planned":{"name":"web","chart":"stable/nginx"}}}"#;
        let responses = exchange(&mut provider, &format!("{}\n", apply)).await;
        assert_eq!(responses[0]["error"]["code"], "helm");
        assert_eq!(responses[0]["error"]["state"]["id"], "web");
        assert_eq!(
            responses[0]["error"]["state"]["metadata"][0]["status"],
            "PENDING_INSTALL"
        );
    }

    #[tokio::test]
    async fn test_name_clash_reports_no_state() {
        let home = tempfile::tempdir().unwrap();
        let helm = MockHelmClient::new();
        let mut provider = Provider::with_meta(testing::meta(home.path(), helm.clone()));
        let apply = r#"{"id":1,"method":"apply","params":{"resource":"helm_chart","planned":{"name":"web","chart":"stable/nginx"}}}"#;
        let input = format!("{}\n{}\n", apply, apply);
        let responses = exchange(&mut provider, &input).await;
        assert_eq!(responses[0]["result"]["state"]["id"], "web");
        assert_eq!(responses[1]["error"]["code"], "helm");
        assert!(responses[1]["error"].get("state").is_none());
        assert_eq!(helm.release_status("web").await.unwrap().revision, 1);
    }
}
