//! Providers: namespaced views onto the process metrics registry.

use super::{withdraw, EntityService, Scope};
use crate::error::BuildError;
use crate::registry::Entity;
use crate::store::Stores;
use krill_telemetry::MetricsProvider;
use krill_types::{EntityKind, ProviderSpec};
use prometheus::Registry;
use std::sync::Arc;

impl Entity for MetricsProvider {
    const KIND: EntityKind = EntityKind::Provider;

    fn name(&self) -> &str {
        MetricsProvider::name(self)
    }
}

pub struct ProviderService {
    stores: Arc<Stores>,
    metrics: Registry,
}

impl ProviderService {
    /// Providers created here register into `metrics`.
    pub fn new(stores: Arc<Stores>, metrics: Registry) -> Self {
        Self { stores, metrics }
    }
}

impl EntityService for ProviderService {
    type Spec = ProviderSpec;
    type Entity = MetricsProvider;

    fn create(&self, spec: &ProviderSpec) -> Result<Arc<MetricsProvider>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        if let Some(ns) = spec.namespace.as_deref() {
            let valid = ns
                .chars()
                .enumerate()
                .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
            if ns.is_empty() || !valid {
                return Err(scope.invalid(format!("'{ns}' is not a valid metric namespace")));
            }
        }
        scope.admit(
            &self.stores.providers,
            Arc::new(MetricsProvider::new(
                &spec.name,
                self.metrics.clone(),
                spec.namespace.as_deref(),
                &spec.labels,
            )),
        )
    }

    fn remove(&self, name: &str) {
        if let Some(provider) = withdraw(&self.stores, &self.stores.providers, name) {
            provider.unregister_all();
        }
    }
}
