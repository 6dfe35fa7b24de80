//! `STRICT` template/provider-instance compatibility check. An empty
//! `capabilities` list on the provider instance means "accepts
//! anything" — [`crate::selection`] already filters candidates down to
//! ones declaring the requested `provider_api`/pricing capability or
//! declaring none at all, so this is a second, explicit gate rather than a
//! silent re-check.

use hostbroker_config::ProviderInstanceConfig;
use hostbroker_domain::{PriceType, Template};

use crate::error::AppError;

pub fn validate_strict(template: &Template, provider: &ProviderInstanceConfig) -> Result<(), AppError> {
    if provider.capabilities.is_empty() {
        return Ok(());
    }

    let api = template.provider_api.to_string();
    if !provider.capabilities.iter().any(|c| c == &api) {
        return Err(AppError::Validation(format!(
            "provider instance '{}' does not support provider api {}",
            provider.name, api
        )));
    }

    if let Some(PriceType::Spot) = template.price_type {
        if !provider.capabilities.iter().any(|c| c == "spot") {
            return Err(AppError::Validation(format!(
                "provider instance '{}' does not support spot pricing",
                provider.name
            )));
        }
    }

    Ok(())
}
