pub mod client;
pub mod credentials;
pub mod error;
pub mod params;
mod sigv4;
pub mod xml;

pub use client::{AwsClient, AwsClientConfig};
pub use credentials::{AwsCredentials, CredentialsProvider};
pub use error::CloudError;
pub use params::ParamBuilder;

#[cfg(any(test, feature = "test-support"))]
pub use credentials::TestCredentials;
