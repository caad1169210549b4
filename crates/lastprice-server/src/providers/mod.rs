//! Routing of tenant traffic to billing/analytics providers.

pub mod paid_ai;
pub mod stripe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use lastprice_core::adapter::{BillingAdapter, ConversionData, ManualAdapter, SignalData};
use lastprice_core::config::Config;
use lastprice_core::tenant::{Provider, Tenant, TenantManager, TenantMode};
use lastprice_core::{CoreError, CoreResult};

pub use paid_ai::PaidAiAdapter;
pub use stripe::StripeAdapter;

pub(crate) fn transport_error(provider: Provider, e: reqwest::Error) -> CoreError {
    CoreError::UpstreamProvider {
        provider: provider.to_string(),
        retryable: e.is_timeout() || e.is_connect(),
        message: e.to_string(),
    }
}

/// Non-2xx response. `message` is whatever the provider put in its error body.
pub(crate) fn status_error(provider: Provider, status: reqwest::StatusCode, message: String) -> CoreError {
    CoreError::UpstreamProvider {
        provider: provider.to_string(),
        retryable: status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        message,
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> CoreResult<reqwest::Url> {
    let raw = format!("{}/{path}", base_url.trim_end_matches('/'));
    reqwest::Url::parse(&raw)
        .map_err(|e| CoreError::Configuration(format!("invalid provider URL {raw}: {e}")))
}

/// Chooses and caches the adapter that serves each tenant.
///
/// * `manual` provider: the tenant's in-process [`ManualAdapter`].
/// * byok: the tenant's own decrypted credential and base URL.
/// * managed: the platform credential from configuration, or the manual
///   adapter (with a warning) when none is configured.
pub struct ProviderRegistry {
    client: reqwest::Client,
    config: Arc<Config>,
    tenants: TenantManager,
    manual: RwLock<HashMap<String, Arc<ManualAdapter>>>,
}

impl ProviderRegistry {
    pub fn new(config: Arc<Config>, tenants: TenantManager) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CoreError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            tenants,
            manual: RwLock::new(HashMap::new()),
        })
    }

    pub async fn manual_adapter(&self, tenant: &Tenant) -> Arc<ManualAdapter> {
        if let Some(adapter) = self.manual.read().await.get(&tenant.id) {
            return Arc::clone(adapter);
        }
        let mut map = self.manual.write().await;
        Arc::clone(
            map.entry(tenant.id.clone())
                .or_insert_with(|| Arc::new(ManualAdapter::new(tenant.id.clone(), tenant.mode))),
        )
    }

    /// Drop cached state of a deleted tenant.
    pub async fn forget(&self, tenant_id: &str) {
        self.manual.write().await.remove(tenant_id);
    }

    fn platform_credential(&self, provider: Provider) -> Option<(&str, &str)> {
        match provider {
            Provider::PaidAi => self
                .config
                .paid_api_key
                .as_deref()
                .map(|key| (key, self.config.paid_api_base_url.as_str())),
            Provider::Stripe => self
                .config
                .stripe_secret_key
                .as_deref()
                .map(|key| (key, self.config.stripe_api_base_url.as_str())),
            Provider::Manual => None,
        }
    }

    fn remote(
        &self,
        provider: Provider,
        tenant: &Tenant,
        api_key: &str,
        base_url: &str,
    ) -> CoreResult<Arc<dyn BillingAdapter>> {
        let adapter: Arc<dyn BillingAdapter> = match provider {
            Provider::PaidAi => Arc::new(PaidAiAdapter::new(
                self.client.clone(),
                api_key,
                base_url,
                &tenant.id,
                tenant.mode,
            )?),
            Provider::Stripe => Arc::new(StripeAdapter::new(
                self.client.clone(),
                api_key,
                base_url,
                &tenant.id,
                tenant.mode,
            )?),
            Provider::Manual => {
                return Err(CoreError::Configuration(
                    "manual provider has no remote endpoint".to_string(),
                ))
            }
        };
        Ok(adapter)
    }

    pub async fn adapter_for(&self, tenant: &Tenant) -> CoreResult<Arc<dyn BillingAdapter>> {
        let provider = tenant.default_provider;
        if provider == Provider::Manual {
            let adapter: Arc<dyn BillingAdapter> = self.manual_adapter(tenant).await;
            return Ok(adapter);
        }

        match tenant.mode {
            TenantMode::Byok => {
                let credential = self.tenants.credential(&tenant.id).await?.ok_or_else(|| {
                    CoreError::Configuration(format!("byok tenant {} has no credential", tenant.id))
                })?;
                self.remote(provider, tenant, &credential.api_key, &credential.base_url)
            }
            TenantMode::Managed => match self.platform_credential(provider) {
                Some((api_key, base_url)) => self.remote(provider, tenant, api_key, base_url),
                None => {
                    warn!(
                        tenant_id = %tenant.id,
                        provider = %provider,
                        "no platform credential configured, using manual adapter"
                    );
                    let adapter: Arc<dyn BillingAdapter> = self.manual_adapter(tenant).await;
                    Ok(adapter)
                }
            },
        }
    }

    /// Emit a signal in the background; failures are logged, never surfaced.
    pub fn dispatch_signal(self: &Arc<Self>, tenant: Tenant, data: SignalData) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let result = match registry.adapter_for(&tenant).await {
                Ok(adapter) => adapter.emit_signal(&data).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(tenant_id = %tenant.id, experiment_id = %data.experiment_id, "signal emitted"),
                Err(e) => warn!(
                    tenant_id = %tenant.id,
                    experiment_id = %data.experiment_id,
                    error = %e,
                    "failed to emit signal"
                ),
            }
        });
    }

    /// Forward a conversion in the background; failures are logged, never surfaced.
    pub fn dispatch_conversion(self: &Arc<Self>, tenant: Tenant, data: ConversionData) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let result = match registry.adapter_for(&tenant).await {
                Ok(adapter) => adapter.track_conversion(&data).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(tenant_id = %tenant.id, experiment_id = %data.experiment_id, "conversion forwarded"),
                Err(e) => warn!(
                    tenant_id = %tenant.id,
                    experiment_id = %data.experiment_id,
                    error = %e,
                    "failed to forward conversion"
                ),
            }
        });
    }
}
