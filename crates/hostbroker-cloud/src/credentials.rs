use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CloudError;

#[derive(Clone, Debug)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials, CloudError>;
}

// ── Static credentials (env vars / config) ────────────────────────────────────

pub struct StaticCredentialsProvider {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, CloudError> {
        Ok(AwsCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
        })
    }
}

// ── IMDS / ECS credentials ────────────────────────────────────────────────────

pub struct ImdsCredentialsProvider {
    pub client: reqwest::Client,
    /// Set when `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` is present.
    pub ecs_uri: Option<String>,
    cache: tokio::sync::Mutex<Option<(AwsCredentials, Instant)>>,
}

impl ImdsCredentialsProvider {
    pub fn new(client: reqwest::Client, ecs_uri: Option<String>) -> Self {
        ImdsCredentialsProvider { client, ecs_uri, cache: tokio::sync::Mutex::new(None) }
    }
}

#[async_trait]
impl CredentialsProvider for ImdsCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, CloudError> {
        {
            let guard = self.cache.lock().await;
            if let Some((creds, expiry)) = guard.as_ref() {
                if Instant::now() < *expiry {
                    return Ok(creds.clone());
                }
            }
        }

        let creds = if let Some(ref uri) = self.ecs_uri {
            let url = format!("http://169.254.170.2{}", uri);
            let resp: Value = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| CloudError::Transport(format!("ECS IMDS request: {}", e)))?
                .json()
                .await
                .map_err(|e| CloudError::Decode(format!("ECS IMDS decode: {}", e)))?;

            AwsCredentials {
                access_key_id: resp["AccessKeyId"].as_str().unwrap_or("").to_string(),
                secret_access_key: resp["SecretAccessKey"].as_str().unwrap_or("").to_string(),
                session_token: resp["Token"].as_str().map(str::to_string),
            }
        } else {
            let token_resp = self
                .client
                .put("http://169.254.169.254/latest/api/token")
                .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
                .send()
                .await
                .map_err(|e| CloudError::Transport(format!("IMDSv2 token request: {}", e)))?;
            let imds_token = token_resp
                .text()
                .await
                .map_err(|e| CloudError::Decode(format!("IMDSv2 token decode: {}", e)))?;

            let roles_resp = self
                .client
                .get("http://169.254.169.254/latest/meta-data/iam/security-credentials/")
                .header("X-aws-ec2-metadata-token", &imds_token)
                .send()
                .await
                .map_err(|e| CloudError::Transport(format!("IMDS roles request: {}", e)))?;
            let roles_text = roles_resp.text().await.unwrap_or_default();
            let role_name = roles_text.lines().next().unwrap_or("").to_string();
            if role_name.is_empty() {
                return Err(CloudError::NoCredentials("IMDS: no IAM role found".into()));
            }

            let creds_url = format!(
                "http://169.254.169.254/latest/meta-data/iam/security-credentials/{}",
                role_name
            );
            let resp: Value = self
                .client
                .get(&creds_url)
                .header("X-aws-ec2-metadata-token", &imds_token)
                .send()
                .await
                .map_err(|e| CloudError::Transport(format!("IMDS creds request: {}", e)))?
                .json()
                .await
                .map_err(|e| CloudError::Decode(format!("IMDS creds decode: {}", e)))?;

            AwsCredentials {
                access_key_id: resp["AccessKeyId"].as_str().unwrap_or("").to_string(),
                secret_access_key: resp["SecretAccessKey"].as_str().unwrap_or("").to_string(),
                session_token: resp["Token"].as_str().map(str::to_string),
            }
        };

        // Cache for 10 minutes; IMDS/ECS creds typically live for hours.
        let expiry = Instant::now() + Duration::from_secs(600);
        *self.cache.lock().await = Some((creds.clone(), expiry));
        Ok(creds)
    }
}

// ── AWS CLI credentials ───────────────────────────────────────────────────────

pub struct AwsCliCredentialsProvider;

#[async_trait]
impl CredentialsProvider for AwsCliCredentialsProvider {
    async fn credentials(&self) -> Result<AwsCredentials, CloudError> {
        let output = StdCommand::new("aws")
            .args(["sts", "get-session-token", "--duration-seconds", "3600", "--output", "json"])
            .output()
            .map_err(|e| {
                CloudError::NoCredentials(format!(
                    "aws CLI not found: {}. Install the AWS CLI or configure credentials via env vars.",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::NoCredentials(format!(
                "aws sts get-session-token failed: {}. Run 'aws configure' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CloudError::Decode(format!("aws CLI output parse: {}", e)))?;

        let creds = &resp["Credentials"];
        Ok(AwsCredentials {
            access_key_id: creds["AccessKeyId"].as_str().unwrap_or("").to_string(),
            secret_access_key: creds["SecretAccessKey"].as_str().unwrap_or("").to_string(),
            session_token: creds["SessionToken"].as_str().map(str::to_string),
        })
    }
}

// ── Static credentials (test-only) ───────────────────────────────────────────

#[cfg(any(test, feature = "test-support"))]
pub struct TestCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl CredentialsProvider for TestCredentials {
    async fn credentials(&self) -> Result<AwsCredentials, CloudError> {
        Ok(AwsCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
        })
    }
}

/// Resolve a credentials provider using the standard chain:
/// 1. `AWS_ACCESS_KEY_ID` + `AWS_SECRET_ACCESS_KEY` env vars
/// 2. `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` (ECS task)
/// 3. EC2 IMDSv2
/// 4. AWS CLI fallback
pub async fn resolve_default_chain(client: reqwest::Client) -> Box<dyn CredentialsProvider> {
    if let (Ok(key), Ok(secret)) =
        (std::env::var("AWS_ACCESS_KEY_ID"), std::env::var("AWS_SECRET_ACCESS_KEY"))
    {
        return Box::new(StaticCredentialsProvider {
            access_key_id: key,
            secret_access_key: secret,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        });
    }
    if let Ok(uri) = std::env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
        return Box::new(ImdsCredentialsProvider::new(client, Some(uri)));
    }
    let imds_probe = client
        .get("http://169.254.169.254/latest/api/token")
        .header("X-aws-ec2-metadata-token-ttl-seconds", "10")
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    if imds_probe.is_ok() {
        Box::new(ImdsCredentialsProvider::new(client, None))
    } else {
        Box::new(AwsCliCredentialsProvider)
    }
}
