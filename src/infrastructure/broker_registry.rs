//! Broker adapter lookup by broker type. Built once at startup; an account
//! whose broker has no registered client fails that user's step only.

use crate::domain::entities::broker_account::BrokerType;
use crate::domain::errors::ConfigurationError;
use crate::domain::repositories::broker_client::BrokerClient;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct BrokerRegistry {
    clients: HashMap<BrokerType, Arc<dyn BrokerClient>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn BrokerClient>) {
        self.clients.insert(client.broker_type(), client);
    }

    pub fn get(&self, broker_type: BrokerType) -> Result<Arc<dyn BrokerClient>, ConfigurationError> {
        self.clients
            .get(&broker_type)
            .cloned()
            .ok_or_else(|| ConfigurationError::BrokerNotRegistered(broker_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::BrokerError;
    use crate::domain::repositories::broker_client::{
        AuthArtifact, BrokerCredentials, BrokerResult, ExecutionReceipt, OrderSpec, RefreshedToken,
    };
    use async_trait::async_trait;

    struct NullClient(BrokerType);

    #[async_trait]
    impl BrokerClient for NullClient {
        fn broker_type(&self) -> BrokerType {
            self.0
        }

        async fn place_order(
            &self,
            _credentials: &BrokerCredentials,
            _spec: &OrderSpec,
        ) -> BrokerResult<ExecutionReceipt> {
            Err(BrokerError::rejected("null"))
        }

        async fn refresh_token(
            &self,
            _credentials: &BrokerCredentials,
        ) -> BrokerResult<RefreshedToken> {
            Err(BrokerError::rejected("null"))
        }

        async fn exchange_token(
            &self,
            _client_id: &str,
            _artifact: &AuthArtifact,
        ) -> BrokerResult<RefreshedToken> {
            Err(BrokerError::rejected("null"))
        }
    }

    #[test]
    fn test_lookup_and_missing_broker() {
        let mut registry = BrokerRegistry::new();
        registry.register(Arc::new(NullClient(BrokerType::Dhan)));

        assert!(registry.get(BrokerType::Dhan).is_ok());
        let err = registry.get(BrokerType::Zerodha).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::BrokerNotRegistered("ZERODHA".to_string())
        );
    }
}
