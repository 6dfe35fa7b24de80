//! Dispatches a [`hostbroker_domain::ProviderApi`] to the handler that
//! speaks that provisioning API. Every key should be registered in normal
//! operation since all four APIs target the same cloud (AWS).

use std::collections::HashMap;
use std::sync::Arc;

use hostbroker_domain::ProviderApi;

use crate::error::ProviderError;
use crate::handler::ProviderHandler;

pub struct ProviderHandlerRegistry {
    handlers: HashMap<ProviderApi, Arc<dyn ProviderHandler>>,
}

impl ProviderHandlerRegistry {
    pub fn new() -> Self {
        ProviderHandlerRegistry { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn ProviderHandler>) -> &mut Self {
        self.handlers.insert(handler.provider_api(), handler);
        self
    }

    pub fn contains(&self, api: ProviderApi) -> bool {
        self.handlers.contains_key(&api)
    }

    pub fn get(&self, api: ProviderApi) -> Result<Arc<dyn ProviderHandler>, ProviderError> {
        self.handlers.get(&api).cloned().ok_or_else(|| ProviderError::NoHandler(api.to_string()))
    }

    pub fn registered_apis(&self) -> Vec<ProviderApi> {
        self.handlers.keys().copied().collect()
    }
}

impl Default for ProviderHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hostbroker_domain::{InstanceId, Request, ResourceMappingHint, Template};

    struct StubHandler(ProviderApi);

    #[async_trait]
    impl ProviderHandler for StubHandler {
        fn provider_api(&self) -> ProviderApi {
            self.0
        }
        async fn acquire(&self, _: &Request, _: &Template) -> Result<crate::handler::AcquireOutcome, ProviderError> {
            unimplemented!()
        }
        async fn poll_status(&self, _: &Request) -> Result<Vec<crate::handler::MachineObservation>, ProviderError> {
            unimplemented!()
        }
        async fn release(
            &self,
            _: &[InstanceId],
            _: &[ResourceMappingHint],
        ) -> Result<crate::handler::ReleaseOutcome, ProviderError> {
            unimplemented!()
        }
    }

    #[test]
    fn lookup_fails_for_unregistered_api() {
        let registry = ProviderHandlerRegistry::new();
        assert!(registry.get(ProviderApi::RunInstances).is_err());
    }

    #[test]
    fn registered_handler_resolves_by_its_own_provider_api() {
        let mut registry = ProviderHandlerRegistry::new();
        registry.register(Arc::new(StubHandler(ProviderApi::Ec2Fleet)));
        assert!(registry.contains(ProviderApi::Ec2Fleet));
        assert!(!registry.contains(ProviderApi::SpotFleet));
    }
}
