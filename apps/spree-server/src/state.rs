use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use spree_sdk::{
    AdminStore, DistributorConfig, ExecutionLookup, Registrar, SettingsCache, SystemClock,
};

use crate::config::Config;

pub struct AppState<S, L> {
    pub store: Arc<S>,
    pub settings: Arc<SettingsCache<S>>,
    pub registrar: Arc<Registrar<S>>,
    /// Reads back the transactions clients report as claims.
    pub chain: Arc<L>,
    pub distributor: DistributorConfig,
    pub admin_token: Option<Arc<str>>,
    pub metrics: PrometheusHandle,
}

impl<S: AdminStore, L: ExecutionLookup> AppState<S, L> {
    pub fn new(store: S, chain: L, config: &Config, metrics: PrometheusHandle) -> Self {
        let store = Arc::new(store);
        let settings =
            Arc::new(SettingsCache::new(store.clone(), SystemClock, config.settings_ttl));
        let registrar = Arc::new(Registrar::new(store.clone(), settings.clone(), SystemClock));
        Self {
            store,
            settings,
            registrar,
            chain: Arc::new(chain),
            distributor: DistributorConfig::default(),
            admin_token: config.admin_token.as_deref().map(Arc::from),
            metrics,
        }
    }
}

// Manual impl: `S` and `L` are shared behind `Arc` and need not be `Clone`.
impl<S, L> Clone for AppState<S, L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            settings: self.settings.clone(),
            registrar: self.registrar.clone(),
            chain: self.chain.clone(),
            distributor: self.distributor.clone(),
            admin_token: self.admin_token.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
