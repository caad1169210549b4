use std::sync::Arc;

use lastprice_core::assign::VariantWeights;
use lastprice_core::billing::BillingCalculator;
use lastprice_core::config::Config;
use lastprice_core::experiment::{ExperimentEngine, ExperimentStore};
use lastprice_core::tenant::{TenantManager, TenantStore};
use lastprice_core::usage::{UsageLog, UsageTracker};
use lastprice_core::vault::KeyVault;
use lastprice_core::CoreError;
use lastprice_duckdb::DuckDbBackend;

use crate::catalog::PricingCatalog;
use crate::providers::ProviderRegistry;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// The managers are cheap handles over the same DuckDB backend.
pub struct AppState {
    /// Internally `Arc<tokio::sync::Mutex<Connection>>`; every store trait
    /// below is implemented on it.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub tenants: TenantManager,
    pub usage: UsageTracker,
    pub billing: BillingCalculator,
    pub experiments: ExperimentEngine,

    /// Plan, price and features shown per variant.
    pub catalog: PricingCatalog,

    pub providers: Arc<ProviderRegistry>,
}

impl AppState {
    /// Wire the managers onto `db`.
    ///
    /// Fails when the encryption key is missing in staging/production, the
    /// control weight is out of range, or the pricing catalog override is invalid.
    pub fn new(db: DuckDbBackend, config: Config) -> Result<Self, CoreError> {
        let db = Arc::new(db);
        let config = Arc::new(config);

        let vault = Arc::new(KeyVault::from_config(&config)?);
        let weights = VariantWeights::new(config.control_weight)?;
        let catalog = PricingCatalog::from_override(config.pricing_catalog.as_deref())?;

        let tenant_store: Arc<dyn TenantStore> = db.clone();
        let usage_log: Arc<dyn UsageLog> = db.clone();
        let experiment_store: Arc<dyn ExperimentStore> = db.clone();

        let tenants = TenantManager::new(Arc::clone(&tenant_store), vault);
        let usage = UsageTracker::new(tenant_store, usage_log);
        let billing = BillingCalculator::new(usage.clone());
        let experiments = ExperimentEngine::new(experiment_store, weights);
        let providers = Arc::new(ProviderRegistry::new(Arc::clone(&config), tenants.clone())?);

        Ok(Self {
            db,
            config,
            tenants,
            usage,
            billing,
            experiments,
            catalog,
            providers,
        })
    }
}
