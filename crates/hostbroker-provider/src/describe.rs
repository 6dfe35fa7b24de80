//! Shared `DescribeInstances` fan-out used by every handler's `poll_status`.
//!
//! Chunks the id list to [`crate::release::DESCRIBE_CHUNK_SIZE`] ids per
//! call, and applies a bounded poll-until-ready retry on a freshly-created
//! reservation: AWS's eventual consistency can return an empty result for a
//! `DescribeInstances` call placed immediately after
//! `RunInstances`/`CreateFleet` returns. Retry-until-ready beats a fixed
//! sleep here, reusing the `read_only` strategy's attempt budget plus one
//! grace attempt.

use std::time::Duration;

use hostbroker_cloud::AwsClient;
use hostbroker_domain::InstanceId;
use hostbroker_resilience::RetryStrategy;

use crate::error::ProviderError;
use crate::instance_adapter::{parse_describe_instances, DescribedInstance};
use crate::release::DESCRIBE_CHUNK_SIZE;
use crate::resilient::ResilienceContext;

/// `describe_instances` for `ids`, chunked and retried. Empty `ids` returns
/// an empty vec without a cloud call.
pub async fn describe_instances(
    client: &AwsClient,
    ctx: &ResilienceContext,
    ids: &[InstanceId],
) -> Result<Vec<DescribedInstance>, ProviderError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for chunk in ids.chunks(DESCRIBE_CHUNK_SIZE) {
        out.extend(describe_chunk_with_grace(client, ctx, chunk).await?);
    }
    Ok(out)
}

async fn describe_chunk_with_grace(
    client: &AwsClient,
    ctx: &ResilienceContext,
    chunk: &[InstanceId],
) -> Result<Vec<DescribedInstance>, ProviderError> {
    let grace_attempts = RetryStrategy::ReadOnly.config().max_attempts + 1;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let params: Vec<(String, String)> = chunk
            .iter()
            .enumerate()
            .map(|(i, id)| (format!("InstanceId.{}", i + 1), id.as_str().to_string()))
            .collect();
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let ctx_ref = &pairs;
        let body = ctx
            .call(RetryStrategy::ReadOnly, "ec2", "describe_instances", || {
                client_query(client, ctx_ref)
            })
            .await?;
        let described = parse_describe_instances(&body);
        if described.len() >= chunk.len() || attempt >= grace_attempts {
            return Ok(described);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn client_query(
    client: &AwsClient,
    params: &[(&str, &str)],
) -> Result<String, hostbroker_domain::DomainError> {
    client.ec2_query("DescribeInstances", params).await.map_err(|e| match e {
        hostbroker_cloud::CloudError::Domain(d) => d,
        other => hostbroker_domain::DomainError::Infra(other.to_string()),
    })
}
