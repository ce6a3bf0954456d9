use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Deserialize;

/// OAuth2 client-credentials token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Runtime view of a virtual machine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

impl InstanceView {
    /// Raw status codes, e.g. `ProvisioningState/succeeded`, `PowerState/running`.
    pub fn codes(&self) -> Vec<String> {
        self.statuses.iter().filter_map(|s| s.code.clone()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceViewStatus {
    pub code: Option<String>,
    pub level: Option<String>,
    pub display_status: Option<String>,
}

/// A long-running operation accepted by Resource Manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncOperation {
    pub(crate) poll: PollTarget,
    /// Delay the service asked for between status checks.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollTarget {
    /// `Azure-AsyncOperation` header: GET returns a status document.
    AsyncOperation(String),
    /// `Location` header: GET returns 202 until done.
    Location(String),
    /// The service finished synchronously.
    Completed,
}

impl AsyncOperation {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let poll = match (header("azure-asyncoperation"), header("location")) {
            (Some(url), _) => PollTarget::AsyncOperation(url),
            (None, Some(url)) => PollTarget::Location(url),
            (None, None) => PollTarget::Completed,
        };
        let retry_after = header("retry-after")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Self { poll, retry_after }
    }

    /// True if there is nothing left to poll.
    pub fn is_completed(&self) -> bool {
        self.poll == PollTarget::Completed
    }
}

/// Status of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
    Canceled,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationBody {
    pub status: String,
    pub error: Option<OperationErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl From<OperationBody> for OperationStatus {
    fn from(body: OperationBody) -> Self {
        match body.status.as_str() {
            "Succeeded" => Self::Succeeded,
            "Canceled" => Self::Canceled,
            "Failed" => {
                let detail = body
                    .error
                    .map(|e| match (e.code, e.message) {
                        (Some(code), Some(message)) => format!("{code}: {message}"),
                        (code, message) => message.or(code).unwrap_or_default(),
                    })
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "operation failed".into());
                Self::Failed(detail)
            }
            _ => Self::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn instance_view_codes() {
        let view: InstanceView = serde_json::from_str(
            r#"{
                "computerName": "mc-vm",
                "statuses": [
                    {"code": "ProvisioningState/succeeded", "level": "Info", "displayStatus": "Provisioning succeeded"},
                    {"code": "PowerState/deallocated", "level": "Info", "displayStatus": "VM deallocated"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            view.codes(),
            vec!["ProvisioningState/succeeded", "PowerState/deallocated"]
        );
        assert_eq!(
            view.statuses[1].display_status.as_deref(),
            Some("VM deallocated")
        );
    }

    #[test]
    fn instance_view_without_statuses() {
        let view: InstanceView = serde_json::from_str("{}").unwrap();
        assert!(view.codes().is_empty());
    }

    #[test]
    fn async_operation_header_wins_over_location() {
        let mut headers = HeaderMap::new();
        headers.insert("azure-asyncoperation", HeaderValue::from_static("https://op/1"));
        headers.insert("location", HeaderValue::from_static("https://loc/1"));
        headers.insert("retry-after", HeaderValue::from_static("10"));

        let op = AsyncOperation::from_headers(&headers);
        assert_eq!(op.poll, PollTarget::AsyncOperation("https://op/1".into()));
        assert_eq!(op.retry_after, Some(Duration::from_secs(10)));
        assert!(!op.is_completed());
    }

    #[test]
    fn location_only_operation() {
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_static("https://loc/2"));
        let op = AsyncOperation::from_headers(&headers);
        assert_eq!(op.poll, PollTarget::Location("https://loc/2".into()));
        assert_eq!(op.retry_after, None);
    }

    #[test]
    fn no_headers_means_completed() {
        assert!(AsyncOperation::from_headers(&HeaderMap::new()).is_completed());
    }

    #[test]
    fn operation_body_statuses() {
        let parse = |json: &str| -> OperationStatus {
            serde_json::from_str::<OperationBody>(json).unwrap().into()
        };

        assert_eq!(parse(r#"{"status":"InProgress"}"#), OperationStatus::InProgress);
        assert_eq!(parse(r#"{"status":"Succeeded"}"#), OperationStatus::Succeeded);
        assert_eq!(parse(r#"{"status":"Canceled"}"#), OperationStatus::Canceled);
        assert_eq!(
            parse(r#"{"status":"Failed","error":{"code":"AllocationFailed","message":"no capacity"}}"#),
            OperationStatus::Failed("AllocationFailed: no capacity".into())
        );
        assert_eq!(
            parse(r#"{"status":"Failed"}"#),
            OperationStatus::Failed("operation failed".into())
        );
    }
}
