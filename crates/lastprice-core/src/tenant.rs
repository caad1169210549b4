use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DEFAULT_PAID_API_BASE_URL, DEFAULT_STRIPE_API_BASE_URL};
use crate::error::{CoreError, CoreResult};
use crate::vault::KeyVault;

pub const MIN_CREDENTIAL_CHARS: usize = 20;
pub const MAX_CREDENTIAL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    /// Table order; ties in plan recommendation resolve to the earlier plan.
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Starter, Plan::Pro, Plan::Enterprise];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Starter => "Starter",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }

    pub fn usage_limit(self) -> u64 {
        match self {
            Self::Free => 1_000,
            Self::Starter => 10_000,
            Self::Pro => 100_000,
            Self::Enterprise => 999_999_999,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(CoreError::invalid(format!("unknown plan '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantMode {
    Managed,
    Byok,
}

impl TenantMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Byok => "byok",
        }
    }
}

impl fmt::Display for TenantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(Self::Managed),
            "byok" => Ok(Self::Byok),
            other => Err(CoreError::invalid(format!("unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "paid-ai")]
    PaidAi,
    #[serde(rename = "stripe")]
    Stripe,
    #[serde(rename = "manual")]
    Manual,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaidAi => "paid-ai",
            Self::Stripe => "stripe",
            Self::Manual => "manual",
        }
    }
}

impl Provider {
    /// Public API root used when a byok credential has no base URL of its own.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Stripe => DEFAULT_STRIPE_API_BASE_URL,
            Self::PaidAi | Self::Manual => DEFAULT_PAID_API_BASE_URL,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid-ai" => Ok(Self::PaidAi),
            "stripe" => Ok(Self::Stripe),
            "manual" => Ok(Self::Manual),
            other => Err(CoreError::invalid(format!("unknown provider '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub mode: TenantMode,
    /// Present exactly when `mode` is byok.
    pub encrypted_credential: Option<String>,
    pub credential_base_url: Option<String>,
    pub usage_limit: u64,
    pub current_usage: u64,
    pub default_provider: Provider,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn has_credential(&self) -> bool {
        self.encrypted_credential.is_some()
    }

    fn set_managed(&mut self) {
        self.mode = TenantMode::Managed;
        self.encrypted_credential = None;
        self.credential_base_url = None;
    }

    fn set_byok(&mut self, encrypted: String, base_url: Option<String>) {
        self.mode = TenantMode::Byok;
        self.encrypted_credential = Some(encrypted);
        self.credential_base_url = base_url;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenant {
    pub name: String,
    pub plan: Option<Plan>,
    pub mode: Option<TenantMode>,
    pub provider: Option<Provider>,
    pub credential: Option<String>,
    pub base_url: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub default_provider: Option<Provider>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TenantFilter {
    pub plan: Option<Plan>,
    pub mode: Option<TenantMode>,
    pub limit: i64,
    pub offset: i64,
}

impl TenantFilter {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(
        plan: Option<Plan>,
        mode: Option<TenantMode>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Self {
        Self {
            plan,
            mode,
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantPage {
    pub tenants: Vec<Tenant>,
    pub total: i64,
}

/// Decrypted provider credential for byok tenants.
#[derive(Clone, PartialEq)]
pub struct ProviderCredential {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Tenant persistence.
///
/// `save_tenant` writes every column except `current_usage`, which only moves
/// through `increment_usage` / `reset_usage` so concurrent metering is never
/// overwritten by a profile update.
#[async_trait]
pub trait TenantStore: Send + Sync + 'static {
    async fn insert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()>;
    async fn get_tenant(&self, id: &str) -> anyhow::Result<Option<Tenant>>;
    async fn list_tenants(&self, filter: &TenantFilter) -> anyhow::Result<(Vec<Tenant>, i64)>;
    async fn save_tenant(&self, tenant: &Tenant) -> anyhow::Result<bool>;
    /// Returns the new `current_usage`, or `None` for an unknown tenant.
    async fn increment_usage(&self, id: &str, amount: u64) -> anyhow::Result<Option<u64>>;
    async fn reset_usage(&self, id: &str) -> anyhow::Result<bool>;
    /// Removes the tenant and its usage records.
    async fn delete_tenant(&self, id: &str) -> anyhow::Result<bool>;
}

/// Generate a tenant ID: "tnt_" + 16 random alphanumeric chars.
pub fn generate_tenant_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let chars: String = (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect();
    format!("tnt_{}", chars)
}

fn required_credential(credential: Option<&str>) -> CoreResult<&str> {
    match credential.map(str::trim) {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err(CoreError::invalid("byok mode requires a credential")),
    }
}

/// Blank values mean "unset"; anything else must be an absolute http(s) URL.
fn optional_url(field: &str, value: Option<String>) -> CoreResult<Option<String>> {
    let Some(raw) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let parsed = url::Url::parse(&raw)
        .map_err(|e| CoreError::invalid(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::invalid(format!("{field} must use http or https")));
    }
    Ok(Some(raw.trim_end_matches('/').to_string()))
}

fn normalized_name(name: &str) -> CoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid("tenant name must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct TenantManager {
    store: Arc<dyn TenantStore>,
    vault: Arc<KeyVault>,
}

impl TenantManager {
    pub fn new(store: Arc<dyn TenantStore>, vault: Arc<KeyVault>) -> Self {
        Self { store, vault }
    }

    pub async fn create_tenant(&self, input: CreateTenant) -> CoreResult<Tenant> {
        let name = normalized_name(&input.name)?;
        let base_url = optional_url("baseUrl", input.base_url)?;
        let webhook_url = optional_url("webhookUrl", input.webhook_url)?;
        let plan = input.plan.unwrap_or(Plan::Free);
        let mode = input.mode.unwrap_or(TenantMode::Managed);

        let encrypted_credential = match mode {
            TenantMode::Byok => {
                let credential = required_credential(input.credential.as_deref())?;
                Some(self.vault.encrypt(credential)?)
            }
            TenantMode::Managed => None,
        };
        let credential_base_url = encrypted_credential.as_ref().and(base_url);

        let now = Utc::now();
        let tenant = Tenant {
            id: generate_tenant_id(),
            name,
            plan,
            mode,
            encrypted_credential,
            credential_base_url,
            usage_limit: plan.usage_limit(),
            current_usage: 0,
            default_provider: input.provider.unwrap_or(Provider::PaidAi),
            webhook_url,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, plan = %plan, mode = %mode, "tenant created");
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: &str) -> CoreResult<Tenant> {
        self.store
            .get_tenant(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("tenant {id}")))
    }

    pub async fn list_tenants(&self, filter: TenantFilter) -> CoreResult<TenantPage> {
        let (tenants, total) = self.store.list_tenants(&filter).await?;
        Ok(TenantPage { tenants, total })
    }

    async fn save(&self, mut tenant: Tenant) -> CoreResult<Tenant> {
        tenant.updated_at = Utc::now();
        if !self.store.save_tenant(&tenant).await? {
            return Err(CoreError::not_found(format!("tenant {}", tenant.id)));
        }
        // Re-read so current_usage reflects concurrent metering.
        self.get_tenant(&tenant.id).await
    }

    pub async fn update_tenant(&self, id: &str, update: UpdateTenant) -> CoreResult<Tenant> {
        let name = update.name.as_deref().map(normalized_name).transpose()?;
        let webhook_url = update
            .webhook_url
            .map(|u| optional_url("webhookUrl", Some(u)))
            .transpose()?;
        let mut tenant = self.get_tenant(id).await?;
        if let Some(name) = name {
            tenant.name = name;
        }
        if let Some(provider) = update.default_provider {
            tenant.default_provider = provider;
        }
        // Some("") clears the webhook.
        if let Some(webhook_url) = webhook_url {
            tenant.webhook_url = webhook_url;
        }
        self.save(tenant).await
    }

    pub async fn change_plan(&self, id: &str, plan: Plan) -> CoreResult<Tenant> {
        let mut tenant = self.get_tenant(id).await?;
        let previous = tenant.plan;
        tenant.plan = plan;
        tenant.usage_limit = plan.usage_limit();
        let tenant = self.save(tenant).await?;
        info!(tenant_id = %id, from = %previous, to = %plan, "tenant plan changed");
        Ok(tenant)
    }

    pub async fn switch_mode(
        &self,
        id: &str,
        mode: TenantMode,
        credential: Option<&str>,
        base_url: Option<String>,
    ) -> CoreResult<Tenant> {
        let encrypted = match mode {
            TenantMode::Byok => Some(self.vault.encrypt(required_credential(credential)?)?),
            TenantMode::Managed => None,
        };
        let base_url = optional_url("baseUrl", base_url)?;
        let mut tenant = self.get_tenant(id).await?;
        match encrypted {
            Some(encrypted) => tenant.set_byok(encrypted, base_url),
            None => tenant.set_managed(),
        }
        let tenant = self.save(tenant).await?;
        info!(tenant_id = %id, mode = %mode, "tenant mode switched");
        Ok(tenant)
    }

    /// Replace the stored credential; the tenant ends up in byok mode.
    pub async fn rotate_credential(
        &self,
        id: &str,
        credential: &str,
        base_url: Option<String>,
    ) -> CoreResult<Tenant> {
        let credential = credential.trim();
        let chars = credential.chars().count();
        if !(MIN_CREDENTIAL_CHARS..=MAX_CREDENTIAL_CHARS).contains(&chars) {
            return Err(CoreError::invalid(format!(
                "credential must be {MIN_CREDENTIAL_CHARS}..={MAX_CREDENTIAL_CHARS} characters"
            )));
        }
        let base_url = optional_url("baseUrl", base_url)?;
        let encrypted = self.vault.encrypt(credential)?;
        let mut tenant = self.get_tenant(id).await?;
        let base_url = base_url.or_else(|| tenant.credential_base_url.clone());
        tenant.set_byok(encrypted, base_url);
        let tenant = self.save(tenant).await?;
        info!(tenant_id = %id, "tenant credential rotated");
        Ok(tenant)
    }

    pub async fn remove_credential(&self, id: &str) -> CoreResult<Tenant> {
        self.switch_mode(id, TenantMode::Managed, None, None).await
    }

    /// Decrypted credential of a byok tenant, `None` for managed tenants.
    /// Without a stored base URL, the default provider's public API root is used.
    pub async fn credential(&self, id: &str) -> CoreResult<Option<ProviderCredential>> {
        let tenant = self.get_tenant(id).await?;
        let Some(stored) = tenant.encrypted_credential.as_deref() else {
            return Ok(None);
        };
        Ok(Some(ProviderCredential {
            api_key: self.vault.reveal(stored)?,
            base_url: tenant
                .credential_base_url
                .clone()
                .unwrap_or_else(|| tenant.default_provider.default_base_url().to_string()),
        }))
    }

    pub async fn increment_usage(&self, id: &str, amount: u64) -> CoreResult<u64> {
        self.store
            .increment_usage(id, amount)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("tenant {id}")))
    }

    pub async fn is_usage_limit_exceeded(&self, id: &str) -> CoreResult<bool> {
        let tenant = self.get_tenant(id).await?;
        Ok(tenant.current_usage >= tenant.usage_limit)
    }

    pub async fn remaining_usage(&self, id: &str) -> CoreResult<u64> {
        let tenant = self.get_tenant(id).await?;
        Ok(tenant.usage_limit.saturating_sub(tenant.current_usage))
    }

    /// Billing-cycle reset of `current_usage`.
    pub async fn reset_usage(&self, id: &str) -> CoreResult<()> {
        if !self.store.reset_usage(id).await? {
            return Err(CoreError::not_found(format!("tenant {id}")));
        }
        info!(tenant_id = %id, "tenant usage reset");
        Ok(())
    }

    pub async fn delete_tenant(&self, id: &str) -> CoreResult<()> {
        if !self.store.delete_tenant(id).await? {
            return Err(CoreError::not_found(format!("tenant {id}")));
        }
        info!(tenant_id = %id, "tenant deleted");
        Ok(())
    }
}
