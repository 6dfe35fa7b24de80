//! Provider-instance selection: choosing among `provider.providers[]`
//! configured instances, a separate concern from
//! [`hostbroker_provider::registry::ProviderHandlerRegistry`], which picks
//! a *handler* by `ProviderApi` once an instance has already been chosen.

use std::sync::atomic::{AtomicUsize, Ordering};

use hostbroker_config::{ProviderInstanceConfig, SelectionPolicy};
use hostbroker_resilience::CircuitBreakerRegistry;

use crate::error::AppError;

/// Round-robin/weighted-round-robin cursor. Health-based and
/// capability-based policies are stateless and ignore it.
#[derive(Default)]
pub struct ProviderSelector {
    cursor: AtomicUsize,
}

impl ProviderSelector {
    pub fn new() -> Self {
        ProviderSelector { cursor: AtomicUsize::new(0) }
    }

    /// Pick one enabled provider instance satisfying `required_capability`
    /// (when capability-based; other policies ignore it unless the
    /// instance declares capabilities at all, in which case an empty list
    /// is treated as "accepts anything").
    pub async fn select<'a>(
        &self,
        policy: SelectionPolicy,
        providers: &'a [ProviderInstanceConfig],
        required_capability: &str,
        breakers: &CircuitBreakerRegistry,
    ) -> Result<&'a ProviderInstanceConfig, AppError> {
        let candidates: Vec<&ProviderInstanceConfig> = providers
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| p.capabilities.is_empty() || p.capabilities.iter().any(|c| c == required_capability))
            .collect();

        if candidates.is_empty() {
            return Err(AppError::NoProviderAvailable);
        }

        match policy {
            SelectionPolicy::RoundRobin => {
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Ok(candidates[idx])
            }
            SelectionPolicy::WeightedRoundRobin => Ok(self.weighted_pick(&candidates)),
            SelectionPolicy::HealthBased => Ok(self.health_pick(&candidates, breakers).await),
            SelectionPolicy::CapabilityBased => {
                // Highest priority first among capability-matching candidates.
                Ok(candidates.into_iter().max_by_key(|p| p.priority).unwrap())
            }
        }
    }

    fn weighted_pick<'a>(&self, candidates: &[&'a ProviderInstanceConfig]) -> &'a ProviderInstanceConfig {
        let total_weight: u32 = candidates.iter().map(|p| p.weight).sum();
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed) as u32 % total_weight.max(1);
        let mut acc = 0u32;
        for candidate in candidates {
            acc += candidate.weight;
            if ticket < acc {
                return candidate;
            }
        }
        candidates[0]
    }

    async fn health_pick<'a>(
        &self,
        candidates: &[&'a ProviderInstanceConfig],
        breakers: &CircuitBreakerRegistry,
    ) -> &'a ProviderInstanceConfig {
        use hostbroker_domain::CircuitState;

        for candidate in candidates {
            let snapshot = breakers.snapshot(&candidate.name, "health_check").await;
            if snapshot.state == CircuitState::Closed {
                return candidate;
            }
        }
        // Every candidate's breaker is open/half-open: fall back to the
        // first one rather than refusing the request outright.
        candidates[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn instance(name: &str, weight: u32, priority: u32, capabilities: &[&str]) -> ProviderInstanceConfig {
        ProviderInstanceConfig {
            name: name.to_string(),
            provider_type: "aws".to_string(),
            enabled: true,
            priority,
            weight,
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            config: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn round_robin_cycles_through_candidates() {
        let selector = ProviderSelector::new();
        let providers = vec![instance("a", 1, 0, &[]), instance("b", 1, 0, &[])];
        let breakers = CircuitBreakerRegistry::new(Default::default());

        let first = selector.select(SelectionPolicy::RoundRobin, &providers, "RunInstances", &breakers).await.unwrap();
        let second = selector.select(SelectionPolicy::RoundRobin, &providers, "RunInstances", &breakers).await.unwrap();
        assert_ne!(first.name, second.name);
    }

    #[tokio::test]
    async fn capability_based_filters_out_non_matching_instances() {
        let selector = ProviderSelector::new();
        let providers = vec![instance("a", 1, 0, &["EC2Fleet"]), instance("b", 1, 5, &["RunInstances"])];
        let breakers = CircuitBreakerRegistry::new(Default::default());

        let picked = selector
            .select(SelectionPolicy::CapabilityBased, &providers, "RunInstances", &breakers)
            .await
            .unwrap();
        assert_eq!(picked.name, "b");
    }

    #[tokio::test]
    async fn no_enabled_provider_is_an_error() {
        let selector = ProviderSelector::new();
        let providers: Vec<ProviderInstanceConfig> = Vec::new();
        let breakers = CircuitBreakerRegistry::new(Default::default());
        let err = selector.select(SelectionPolicy::RoundRobin, &providers, "RunInstances", &breakers).await;
        assert!(matches!(err, Err(AppError::NoProviderAvailable)));
    }
}
