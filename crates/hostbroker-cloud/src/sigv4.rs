use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credentials::AwsCredentials;

type HmacSha256 = Hmac<Sha256>;

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Extract the hostname from a URL (scheme://host/path → host).
pub fn url_host(url: &str) -> &str {
    let without_scheme = url.trim_start_matches("https://").trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None => without_scheme,
    }
}

/// Build SigV4 request headers for an AWS API call.
///
/// Returns a `BTreeMap` of headers to add to the request. Caller must also
/// set `Content-Type` and `Host`.
pub fn headers(
    method: &str,
    uri_path: &str,
    query_string: &str,
    content_type: &str,
    body: &[u8],
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    host: &str,
) -> BTreeMap<String, String> {
    let now = chrono::Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let payload_hash = sha256_hex(body);

    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("content-type".into(), content_type.into());
    canon_hdrs.insert("host".into(), host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());
    if let Some(ref token) = creds.session_token {
        canon_hdrs.insert("x-amz-security-token".into(), token.clone());
    }

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String =
        canon_hdrs.iter().map(|(k, v)| format!("{}:{}\n", k, v.trim())).collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, uri_path, query_string, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, region, service);
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    if let Some(ref token) = creds.session_token {
        out.insert("x-amz-security-token".into(), token.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        assert_eq!(url_host("https://ec2.us-east-1.amazonaws.com"), "ec2.us-east-1.amazonaws.com");
        assert_eq!(url_host("https://ec2.us-east-1.amazonaws.com/"), "ec2.us-east-1.amazonaws.com");
    }

    #[test]
    fn headers_include_authorization_and_date() {
        let creds = test_creds();
        let h = headers(
            "POST",
            "/",
            "",
            "application/x-www-form-urlencoded; charset=utf-8",
            b"Action=DescribeInstances&Version=2016-11-15",
            &creds,
            "us-east-1",
            "ec2",
            "ec2.us-east-1.amazonaws.com",
        );
        assert!(h["Authorization"].starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(h.contains_key("x-amz-date"));
        assert!(h.contains_key("x-amz-content-sha256"));
    }

    #[test]
    fn session_token_is_included_when_present() {
        let mut creds = test_creds();
        creds.session_token = Some("sessiontoken123".into());
        let h = headers("POST", "/", "", "text/plain", b"", &creds, "us-east-1", "ec2", "host");
        assert_eq!(h["x-amz-security-token"], "sessiontoken123");
    }
}
