/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `LASTPRICE_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Timestamps are stored as epoch milliseconds (`*_at_ms BIGINT`).
///
/// DuckDB has no cascading deletes; `delete_tenant` removes usage rows and
/// the tenant inside one transaction.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- TENANTS
-- ===========================================
CREATE TABLE IF NOT EXISTS tenants (
    id                    VARCHAR PRIMARY KEY,      -- 'tnt_' + 16 alphanumerics
    name                  VARCHAR NOT NULL,
    plan                  VARCHAR NOT NULL,         -- free | starter | pro | enterprise
    mode                  VARCHAR NOT NULL,         -- managed | byok
    encrypted_credential  VARCHAR,                  -- ivHex:authTagHex:cipherTextHex
    credential_base_url   VARCHAR,
    usage_limit           BIGINT NOT NULL,
    current_usage         BIGINT NOT NULL DEFAULT 0,
    default_provider      VARCHAR NOT NULL,         -- paid-ai | stripe | manual
    webhook_url           VARCHAR,
    created_at_ms         BIGINT NOT NULL,
    updated_at_ms         BIGINT NOT NULL,
    CHECK ((mode = 'byok') = (encrypted_credential IS NOT NULL))
);

-- ===========================================
-- USAGE RECORDS (append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS usage_records (
    id              VARCHAR PRIMARY KEY,
    tenant_id       VARCHAR NOT NULL,
    usage_type      VARCHAR NOT NULL,               -- signal | api_call
    unit_count      BIGINT NOT NULL CHECK (unit_count > 0),
    metadata        VARCHAR NOT NULL DEFAULT '{{}}',  -- JSON object of scalars
    recorded_at_ms  BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_tenant_time ON usage_records(tenant_id, recorded_at_ms);

-- ===========================================
-- EXPERIMENTS
-- ===========================================
CREATE TABLE IF NOT EXISTS experiment_assignments (
    experiment_id   VARCHAR NOT NULL,
    user_id         VARCHAR NOT NULL,
    variant         VARCHAR NOT NULL,               -- control | experiment
    assigned_at_ms  BIGINT NOT NULL,
    PRIMARY KEY (experiment_id, user_id)
);

CREATE TABLE IF NOT EXISTS experiment_counters (
    experiment_id   VARCHAR NOT NULL,
    variant         VARCHAR NOT NULL,
    views           BIGINT NOT NULL DEFAULT 0,
    conversions     BIGINT NOT NULL DEFAULT 0,
    revenue         DOUBLE NOT NULL DEFAULT 0,
    PRIMARY KEY (experiment_id, variant)
);
"#
    )
}
