use hostbroker_domain::from_aws_code;

use crate::credentials::{resolve_default_chain, AwsCredentials, CredentialsProvider};
use crate::error::CloudError;
use crate::sigv4;
use crate::xml;

/// Static configuration for the AWS client.
#[derive(Clone, Debug)]
pub struct AwsClientConfig {
    pub region: String,
}

#[derive(Clone)]
struct BaseUrls {
    ec2: String,
    autoscaling: String,
    sts: String,
}

impl BaseUrls {
    fn for_region(region: &str) -> Self {
        BaseUrls {
            ec2: format!("https://ec2.{}.amazonaws.com", region),
            autoscaling: format!("https://autoscaling.{}.amazonaws.com", region),
            sts: format!("https://sts.{}.amazonaws.com", region),
        }
    }
}

/// Thin façade over the AWS Query API (EC2, Auto Scaling) used by the four
/// provisioning-API handlers. Owns credential resolution and SigV4 signing;
/// callers only ever see raw XML response bodies or a translated
/// [`hostbroker_domain::DomainError`].
pub struct AwsClient {
    region: String,
    client: reqwest::Client,
    creds: Box<dyn CredentialsProvider>,
    base: BaseUrls,
}

impl AwsClient {
    pub async fn new(config: AwsClientConfig) -> Result<Self, CloudError> {
        let client = reqwest::Client::new();
        let base = BaseUrls::for_region(&config.region);
        let creds = resolve_default_chain(client.clone()).await;
        Ok(AwsClient { region: config.region, client, creds, base })
    }

    /// Construct a client with injected credentials and base URLs. Used
    /// exclusively in tests, where `ec2_base`/`autoscaling_base` point at a
    /// wiremock server instead of the real AWS endpoints.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_test_config(
        region: impl Into<String>,
        ec2_base: impl Into<String>,
        autoscaling_base: impl Into<String>,
        creds: impl CredentialsProvider + 'static,
    ) -> Self {
        let sts_base = ec2_base.into();
        AwsClient {
            region: region.into(),
            client: reqwest::Client::new(),
            creds: Box::new(creds),
            base: BaseUrls {
                autoscaling: autoscaling_base.into(),
                sts: sts_base.clone(),
                ec2: sts_base,
            },
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn get_creds(&self) -> Result<AwsCredentials, CloudError> {
        self.creds.credentials().await
    }

    /// POST an AWS Query-protocol request against the EC2 endpoint. Returns
    /// the raw response XML; the caller parses out the fields it needs with
    /// [`crate::xml`].
    pub async fn ec2_query(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<String, CloudError> {
        let creds = self.get_creds().await?;
        self.query(&self.base.ec2.clone(), "ec2", action, &creds, params).await
    }

    /// POST an AWS Query-protocol request against the Auto Scaling endpoint.
    pub async fn autoscaling_query(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<String, CloudError> {
        let creds = self.get_creds().await?;
        self.query(&self.base.autoscaling.clone(), "autoscaling", action, &creds, params).await
    }

    /// Like [`Self::ec2_query`], but loops on the response's `nextToken`
    /// until the paginator is exhausted, returning one raw XML body per
    /// page. Callers re-parse each page with [`crate::xml`] and
    /// concatenate the fields they need.
    pub async fn ec2_query_paginated(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<String>, CloudError> {
        let mut pages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut all: Vec<(&str, &str)> = params.to_vec();
            if let Some(t) = &token {
                all.push(("NextToken", t.as_str()));
            }
            let body = self.ec2_query(action, &all).await?;
            let next = xml::text(&body, "nextToken");
            pages.push(body);
            match next {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }
        Ok(pages)
    }

    /// Like [`Self::ec2_query_paginated`], against the Auto Scaling
    /// endpoint.
    pub async fn autoscaling_query_paginated(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<String>, CloudError> {
        let mut pages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut all: Vec<(&str, &str)> = params.to_vec();
            if let Some(t) = &token {
                all.push(("NextToken", t.as_str()));
            }
            let body = self.autoscaling_query(action, &all).await?;
            let next = xml::text(&body, "NextToken");
            pages.push(body);
            match next {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }
        Ok(pages)
    }

    /// POST an AWS Query-protocol request against the STS endpoint.
    pub async fn sts_query(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<String, CloudError> {
        let creds = self.get_creds().await?;
        self.query(&self.base.sts.clone(), "sts", action, &creds, params).await
    }

    /// `GetCallerIdentity`, used for health checks and to resolve the
    /// caller's account id when expanding a spot-fleet service-linked role
    /// short form into its canonical ARN.
    pub async fn get_caller_identity(&self) -> Result<String, CloudError> {
        let xml = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            self.sts_query("GetCallerIdentity", &[("Version", "2011-06-15")]),
        )
        .await
        .map_err(|_| CloudError::Transport("GetCallerIdentity timed out".into()))??;
        xml::text(&xml, "Account")
            .ok_or_else(|| CloudError::Decode("GetCallerIdentity: no Account element".into()))
    }

    async fn query(
        &self,
        base_url: &str,
        service: &str,
        action: &str,
        creds: &AwsCredentials,
        params: &[(&str, &str)],
    ) -> Result<String, CloudError> {
        let host = sigv4::url_host(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));

        let mut all_params: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        all_params.push(("Action", action));
        all_params.extend_from_slice(params);

        let body_str = all_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let body_bytes = body_str.as_bytes();

        let ct = "application/x-www-form-urlencoded; charset=utf-8";
        let sig_headers =
            sigv4::headers("POST", "/", "", ct, body_bytes, creds, &self.region, service, &host);

        let mut req = self.client.post(&url).header("Content-Type", ct).body(body_bytes.to_vec());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CloudError::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status >= 400 {
            let code = xml::error_code(&text);
            let message = xml::error_message(&text);
            return Err(CloudError::Domain(from_aws_code(&code, &message)));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TestCredentials;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_creds() -> TestCredentials {
        TestCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        }
    }

    #[tokio::test]
    async fn ec2_query_returns_response_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><requestId>r-1</requestId></DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let client =
            AwsClient::with_test_config("us-east-1", server.uri(), server.uri(), test_creds());
        let body = client.ec2_query("DescribeInstances", &[]).await.unwrap();
        assert!(body.contains("requestId"));
    }

    #[tokio::test]
    async fn ec2_query_translates_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<Response><Errors><Error><Code>RequestLimitExceeded</Code><Message>slow down</Message></Error></Errors></Response>",
            ))
            .mount(&server)
            .await;

        let client =
            AwsClient::with_test_config("us-east-1", server.uri(), server.uri(), test_creds());
        let err = client.ec2_query("RunInstances", &[]).await.unwrap_err();
        assert!(matches!(err, CloudError::Domain(hostbroker_domain::DomainError::RateLimit(_))));
    }
}
