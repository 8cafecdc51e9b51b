//! Wire protocol for the activation server: JSON over HTTP POST, plus the
//! informational announcement endpoint.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use swx_domain::LicenseReceipt;

use super::LicenseError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ActivateData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateData {
    #[serde(default)]
    pub cursor_token: Option<String>,
    /// Multi-token keys; takes precedence over the single-token field.
    #[serde(default)]
    pub cursor_tokens: Option<Vec<String>>,
    #[serde(default)]
    pub cursor_email: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub remaining_days: Option<i64>,
    #[serde(default)]
    pub max_devices: Option<u32>,
}

impl ActivateData {
    /// Every bearer token the key resolves to, single or multi.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        match &self.cursor_tokens {
            Some(tokens) if !tokens.is_empty() => tokens.clone(),
            _ => self.cursor_token.iter().cloned().collect(),
        }
    }
}

/// Verify endpoint reply: a signed receipt on success, or an explicit
/// rejection. Simplified deployments omit the signature entirely.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub receipt: Option<LicenseReceipt>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub server_time: Option<String>,
}

impl VerifyResponse {
    #[must_use]
    pub fn rejected(&self) -> bool {
        self.valid == Some(false) || self.success == Some(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

pub struct LicenseClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl LicenseClient {
    pub fn new(base_url: &str) -> Result<Self, LicenseError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|err| LicenseError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn activate(&self, body: &Value) -> Result<ActivateResponse, LicenseError> {
        self.post("/v1/licenses/activate", body)
    }

    pub fn verify(&self, body: &Value) -> Result<VerifyResponse, LicenseError> {
        self.post("/v1/licenses/verify", body)
    }

    /// Best-effort device unbinding; callers ignore the result.
    pub fn deactivate(&self, body: &Value) -> Result<(), LicenseError> {
        let _: Value = self.post("/v1/licenses/deactivate", body)?;
        Ok(())
    }

    pub fn current_announcement(&self, platform: &str) -> Result<Option<Announcement>, LicenseError> {
        let url = format!(
            "{}/v1/announcement/current?platform={platform}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| LicenseError::Network(err.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(response.json().ok())
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, LicenseError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "license server request");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|err| LicenseError::Network(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| LicenseError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(rejection_from_body(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|err| LicenseError::Network(format!("malformed server reply: {err}")))
    }
}

/// Map an HTTP error body onto the closed rejection set. The server labels
/// authoritative rejections with an `error` code; anything unlabelled stays
/// a generic rejection so callers don't clear local state on flukes.
fn rejection_from_body(status: u16, body: &str) -> LicenseError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    match code.as_str() {
        "INVALID_KEY" => LicenseError::InvalidKey,
        "REVOKED" => LicenseError::Revoked,
        "EXPIRED" => LicenseError::Expired,
        _ => LicenseError::Rejected(
            message.unwrap_or_else(|| format!("HTTP {status}: {}", body.trim())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_prefer_the_multi_token_field() {
        let data = ActivateData {
            cursor_token: Some("single".into()),
            cursor_tokens: Some(vec!["one".into(), "two".into()]),
            cursor_email: None,
            expires_at: None,
            remaining_days: None,
            max_devices: None,
        };
        assert_eq!(data.tokens(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn tokens_fall_back_to_the_single_field() {
        let data: ActivateData = serde_json::from_value(serde_json::json!({
            "cursorToken": "single",
            "cursorEmail": "a@b.c",
        }))
        .unwrap();
        assert_eq!(data.tokens(), vec!["single".to_string()]);
    }

    #[test]
    fn rejection_codes_map_to_the_closed_error_set() {
        let err = rejection_from_body(404, r#"{"error":"INVALID_KEY","message":"no such key"}"#);
        assert!(matches!(err, LicenseError::InvalidKey));
        let err = rejection_from_body(403, r#"{"error":"REVOKED"}"#);
        assert!(matches!(err, LicenseError::Revoked));
        let err = rejection_from_body(500, "oops");
        assert!(matches!(err, LicenseError::Rejected(_)));
    }

    #[test]
    fn verify_rejection_shapes_are_recognized() {
        let reply: VerifyResponse =
            serde_json::from_str(r#"{"valid": false, "message": "gone"}"#).unwrap();
        assert!(reply.rejected());
        let reply: VerifyResponse = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(reply.rejected());
    }
}
