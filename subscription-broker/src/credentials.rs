//! Application credential registry
//!
//! Maps (application, tenant) pairs to the secret used to obtain platform
//! tokens. Entries are created on the first registration request for a pair
//! and live for the lifetime of the process.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{ApplicationId, TenantId};

/// API credential for one application registered in one tenant.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    application_id: ApplicationId,
    tenant_id: TenantId,
    secret: String,
}

impl Credential {
    pub fn new(application_id: ApplicationId, tenant_id: TenantId, secret: impl Into<String>) -> Self {
        Self {
            application_id,
            tenant_id,
            secret: secret.into(),
        }
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("application_id", &self.application_id)
            .field("tenant_id", &self.tenant_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Thread-safe registry of application credentials.
///
/// Keyed by application first and tenant second, so lookups by tenant alone
/// walk every application. Cloning the registry yields another handle to the
/// same entries.
#[derive(Clone, Default)]
pub struct CredentialRegistry {
    applications: Arc<DashMap<ApplicationId, DashMap<TenantId, Arc<Credential>>>>,
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential, returning the stored entry.
    ///
    /// If the pair is already registered the existing entry is returned
    /// unchanged; the secret is never overwritten.
    pub fn add(
        &self,
        application_id: ApplicationId,
        tenant_id: TenantId,
        secret: impl Into<String>,
    ) -> Arc<Credential> {
        let tenants = self.applications.entry(application_id).or_default();
        let entry = tenants.entry(tenant_id).or_insert_with(|| {
            tracing::info!(
                application_id = %application_id,
                tenant_id = %tenant_id,
                "Registered application credential"
            );
            Arc::new(Credential::new(application_id, tenant_id, secret))
        });
        Arc::clone(entry.value())
    }

    /// Exact lookup by application and tenant.
    pub fn get(&self, application_id: ApplicationId, tenant_id: TenantId) -> Option<Arc<Credential>> {
        self.applications
            .get(&application_id)?
            .get(&tenant_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All credentials registered for the tenant, under any application.
    ///
    /// Order is unspecified.
    pub fn get_by_tenant(&self, tenant_id: TenantId) -> impl Iterator<Item = Arc<Credential>> + '_ {
        self.applications.iter().filter_map(move |tenants| {
            tenants
                .get(&tenant_id)
                .map(|entry| Arc::clone(entry.value()))
        })
    }

    /// Any credential usable for the tenant.
    pub fn first_for_tenant(&self, tenant_id: TenantId) -> Option<Arc<Credential>> {
        self.get_by_tenant(tenant_id).next()
    }

    /// Total number of registered credentials.
    pub fn len(&self) -> usize {
        self.applications.iter().map(|tenants| tenants.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("credentials", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (ApplicationId, TenantId) {
        (ApplicationId::new(Uuid::new_v4()), TenantId::new(Uuid::new_v4()))
    }

    #[test]
    fn test_add_is_idempotent_and_keeps_first_secret() {
        let registry = CredentialRegistry::new();
        let (app, tenant) = ids();

        let first = registry.add(app, tenant, "first-secret");
        let second = registry.add(app, tenant, "second-secret");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.secret(), "first-secret");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_exact_lookup() {
        let registry = CredentialRegistry::new();
        let (app, tenant) = ids();
        let (other_app, other_tenant) = ids();

        registry.add(app, tenant, "secret");

        let found = registry.get(app, tenant).unwrap();
        assert_eq!(found.application_id(), app);
        assert_eq!(found.tenant_id(), tenant);
        assert!(registry.get(other_app, tenant).is_none());
        assert!(registry.get(app, other_tenant).is_none());
    }

    #[test]
    fn test_lookup_by_tenant_spans_applications() {
        let registry = CredentialRegistry::new();
        let tenant = TenantId::new(Uuid::new_v4());
        let app_a = ApplicationId::new(Uuid::new_v4());
        let app_b = ApplicationId::new(Uuid::new_v4());
        let (app_c, tenant_c) = ids();

        registry.add(app_a, tenant, "a");
        registry.add(app_b, tenant, "b");
        registry.add(app_c, tenant_c, "c");

        let mut apps: Vec<_> = registry
            .get_by_tenant(tenant)
            .map(|c| c.application_id())
            .collect();
        apps.sort();
        let mut expected = vec![app_a, app_b];
        expected.sort();
        assert_eq!(apps, expected);

        assert!(registry.first_for_tenant(tenant).is_some());
        assert!(registry.first_for_tenant(TenantId::new(Uuid::new_v4())).is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let (app, tenant) = ids();
        let credential = Credential::new(app, tenant, "hunter2");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_concurrent_add_creates_single_entry() {
        let registry = CredentialRegistry::new();
        let (app, tenant) = ids();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(app, tenant, format!("secret-{i}")))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
