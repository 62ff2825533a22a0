//! DQM Manager (spec.md §2, §9): the process-wide directory of Leads.
//! Modeled as the "global, mutable queue manager" pattern's resolution —
//! a singleton value constructed at startup, mutated only through this
//! interface, never exposing a raw pointer to a Lead.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{GatewayError, LookupError};

use super::lead::{Lead, LeadConfig};

#[derive(Default)]
pub struct GatewayManager {
    leads: RwLock<HashMap<String, Arc<Lead>>>,
}

impl GatewayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches a Lead for `config.database_name` and adds it to the
    /// directory. Replaces any existing Lead registered under the same
    /// name (config reload).
    pub async fn add_database(&self, config: LeadConfig) -> Result<(), GatewayError> {
        let name = config.database_name.clone();
        let lead = Lead::launch(config).await?;
        let mut leads = self.leads.write().await;
        leads.insert(name, lead);
        Ok(())
    }

    pub async fn remove_database(&self, database_name: &str) -> Result<(), GatewayError> {
        let mut leads = self.leads.write().await;
        let Some(lead) = leads.remove(database_name) else {
            return Err(GatewayError::Lookup(LookupError::DatabaseNotFound(database_name.to_string())));
        };
        drop(leads);
        lead.shutdown().await;
        info!(database = database_name, "database removed from gateway");
        Ok(())
    }

    pub async fn lookup(&self, database_name: &str) -> Result<Arc<Lead>, GatewayError> {
        self.leads
            .read()
            .await
            .get(database_name)
            .cloned()
            .ok_or_else(|| GatewayError::Lookup(LookupError::DatabaseNotFound(database_name.to_string())))
    }

    pub async fn database_names(&self) -> Vec<String> {
        self.leads.read().await.keys().cloned().collect()
    }

    pub async fn shutdown_all(&self) {
        let mut leads = self.leads.write().await;
        for (name, lead) in leads.drain() {
            lead.shutdown().await;
            info!(database = name, "database shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_on_empty_manager_is_database_not_found() {
        let manager = GatewayManager::new();
        let err = manager.lookup("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::Lookup(LookupError::DatabaseNotFound(_))));
    }

    #[tokio::test]
    async fn remove_unknown_database_errors() {
        let manager = GatewayManager::new();
        let err = manager.remove_database("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::Lookup(LookupError::DatabaseNotFound(_))));
    }
}
