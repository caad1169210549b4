use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assign::{choose_variant, Variant, VariantWeights};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantCounters {
    pub views: u64,
    pub conversions: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentCounters {
    pub experiment_id: String,
    pub control: VariantCounters,
    pub experiment: VariantCounters,
}

impl ExperimentCounters {
    pub fn empty(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            control: VariantCounters::default(),
            experiment: VariantCounters::default(),
        }
    }

    pub fn variant(&self, variant: Variant) -> &VariantCounters {
        match variant {
            Variant::Control => &self.control,
            Variant::Experiment => &self.experiment,
        }
    }

    pub fn variant_mut(&mut self, variant: Variant) -> &mut VariantCounters {
        match variant {
            Variant::Control => &mut self.control,
            Variant::Experiment => &mut self.experiment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub experiment_id: String,
    pub user_id: String,
    pub variant: Variant,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ConversionInput {
    pub revenue: Option<f64>,
}

/// Assignment and counter persistence.
#[async_trait]
pub trait ExperimentStore: Send + Sync + 'static {
    async fn get_assignment(
        &self,
        experiment_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<Variant>>;

    /// Persist `variant` unless the user already has one. Only the call that
    /// creates the assignment initialises counters and adds one view. Returns
    /// the variant that is stored after the call.
    async fn assign_if_absent(
        &self,
        experiment_id: &str,
        user_id: &str,
        variant: Variant,
    ) -> anyhow::Result<Variant>;

    /// Count one conversion for the user's variant. `None` when the user has
    /// no assignment in the experiment.
    async fn record_conversion(
        &self,
        experiment_id: &str,
        user_id: &str,
        revenue: f64,
    ) -> anyhow::Result<Option<ExperimentCounters>>;

    async fn get_counters(&self, experiment_id: &str)
        -> anyhow::Result<Option<ExperimentCounters>>;

    async fn list_assignments(&self, experiment_id: &str) -> anyhow::Result<Vec<Assignment>>;

    /// Drop every assignment and counter of the experiment. Returns the
    /// number of assignments removed.
    async fn reset_experiment(&self, experiment_id: &str) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantReport {
    pub views: u64,
    pub conversions: u64,
    pub revenue: f64,
    /// conversions / views, as a fraction.
    pub conversion_rate: f64,
    /// revenue / conversions.
    pub arpu: f64,
}

impl From<&VariantCounters> for VariantReport {
    fn from(c: &VariantCounters) -> Self {
        Self {
            views: c.views,
            conversions: c.conversions,
            revenue: c.revenue,
            conversion_rate: if c.views > 0 {
                c.conversions as f64 / c.views as f64
            } else {
                0.0
            },
            arpu: if c.conversions > 0 {
                c.revenue / c.conversions as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummary {
    pub total_views: u64,
    pub total_conversions: u64,
    pub total_revenue: f64,
    /// experiment minus control.
    pub conversion_rate_diff: f64,
    pub arpu_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub control: VariantReport,
    pub experiment: VariantReport,
    pub summary: ResultsSummary,
}

impl ExperimentReport {
    pub fn from_counters(counters: &ExperimentCounters) -> Self {
        let control = VariantReport::from(&counters.control);
        let experiment = VariantReport::from(&counters.experiment);
        let summary = ResultsSummary {
            total_views: control.views + experiment.views,
            total_conversions: control.conversions + experiment.conversions,
            total_revenue: control.revenue + experiment.revenue,
            conversion_rate_diff: experiment.conversion_rate - control.conversion_rate,
            arpu_diff: experiment.arpu - control.arpu,
        };
        Self {
            experiment_id: counters.experiment_id.clone(),
            control,
            experiment,
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingExperiment {
    pub experiment_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExperimentResults {
    Found(ExperimentReport),
    NotFound(MissingExperiment),
}

impl ExperimentResults {
    pub fn not_found(experiment_id: &str) -> Self {
        Self::NotFound(MissingExperiment {
            experiment_id: experiment_id.to_string(),
            status: "not_found",
            message: "No data available for this experiment",
        })
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

fn require_id(what: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::invalid(format!("{what} must not be empty")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ExperimentEngine {
    store: Arc<dyn ExperimentStore>,
    default_weights: VariantWeights,
}

impl ExperimentEngine {
    pub fn new(store: Arc<dyn ExperimentStore>, default_weights: VariantWeights) -> Self {
        Self {
            store,
            default_weights,
        }
    }

    pub async fn assign_variant(
        &self,
        user_id: &str,
        experiment_id: &str,
        weights: Option<VariantWeights>,
    ) -> CoreResult<Variant> {
        require_id("userId", user_id)?;
        require_id("experimentId", experiment_id)?;
        let weights = weights.unwrap_or(self.default_weights);
        weights.validate()?;

        if let Some(existing) = self.store.get_assignment(experiment_id, user_id).await? {
            return Ok(existing);
        }
        let chosen = choose_variant(user_id, experiment_id, weights);
        let stored = self
            .store
            .assign_if_absent(experiment_id, user_id, chosen)
            .await?;
        debug!(experiment_id, user_id, variant = %stored, "variant assigned");
        Ok(stored)
    }

    pub async fn get_variant(
        &self,
        user_id: &str,
        experiment_id: &str,
    ) -> CoreResult<Option<Variant>> {
        Ok(self.store.get_assignment(experiment_id, user_id).await?)
    }

    pub async fn track_conversion(
        &self,
        user_id: &str,
        experiment_id: &str,
        conversion: ConversionInput,
    ) -> CoreResult<ExperimentCounters> {
        require_id("userId", user_id)?;
        require_id("experimentId", experiment_id)?;
        let revenue = conversion.revenue.unwrap_or(0.0);
        if !revenue.is_finite() || revenue < 0.0 {
            return Err(CoreError::invalid(
                "revenue must be a finite, non-negative number",
            ));
        }

        self.store
            .record_conversion(experiment_id, user_id, revenue)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "user {user_id} has no assignment in experiment {experiment_id}"
                ))
            })
    }

    pub async fn get_experiment_results(&self, experiment_id: &str) -> CoreResult<ExperimentResults> {
        Ok(match self.store.get_counters(experiment_id).await? {
            Some(counters) => ExperimentResults::Found(ExperimentReport::from_counters(&counters)),
            None => ExperimentResults::not_found(experiment_id),
        })
    }

    pub async fn list_assignments(&self, experiment_id: &str) -> CoreResult<Vec<Assignment>> {
        Ok(self.store.list_assignments(experiment_id).await?)
    }

    pub async fn reset_experiment(&self, experiment_id: &str) -> CoreResult<u64> {
        require_id("experimentId", experiment_id)?;
        let removed = self.store.reset_experiment(experiment_id).await?;
        info!(experiment_id, removed, "experiment reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn engine() -> ExperimentEngine {
        ExperimentEngine::new(Arc::new(MemoryStore::new()), VariantWeights::default())
    }

    #[tokio::test]
    async fn first_assignment_is_sticky_and_counts_one_view() {
        let engine = engine();
        let first = engine
            .assign_variant("u1", "exp_pricing_test", None)
            .await
            .expect("assign");
        assert_eq!(first, Variant::Experiment);
        for _ in 0..5 {
            let again = engine
                .assign_variant("u1", "exp_pricing_test", None)
                .await
                .expect("assign");
            assert_eq!(again, first);
        }
        let ExperimentResults::Found(report) =
            engine.get_experiment_results("exp_pricing_test").await.expect("results")
        else {
            panic!("expected results");
        };
        assert_eq!(report.experiment.views, 1);
        assert_eq!(report.control.views, 0);
    }

    #[tokio::test]
    async fn later_weights_do_not_move_existing_users() {
        let engine = engine();
        let first = engine.assign_variant("u1", "exp", None).await.expect("assign");
        let forced = VariantWeights::new(if first == Variant::Control { 0.0 } else { 1.0 })
            .expect("weights");
        assert_eq!(
            engine.assign_variant("u1", "exp", Some(forced)).await.expect("assign"),
            first
        );
    }

    #[tokio::test]
    async fn empty_ids_and_bad_weights_are_invalid() {
        let engine = engine();
        assert!(matches!(
            engine.assign_variant("", "exp", None).await,
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.assign_variant("u1", " ", None).await,
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine
                .assign_variant("u1", "exp", Some(VariantWeights { control_weight: 2.0 }))
                .await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn conversion_without_assignment_is_not_found() {
        let engine = engine();
        let err = engine
            .track_conversion("ghost", "exp", ConversionInput { revenue: Some(10.0) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(!engine.get_experiment_results("exp").await.expect("results").is_found());
    }

    #[tokio::test]
    async fn negative_revenue_is_rejected_before_any_write() {
        let engine = engine();
        engine.assign_variant("u1", "exp", None).await.expect("assign");
        for revenue in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                engine
                    .track_conversion("u1", "exp", ConversionInput { revenue: Some(revenue) })
                    .await,
                Err(CoreError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn repeated_conversions_all_count() {
        let engine = engine();
        let variant = engine.assign_variant("u2", "exp_pricing_test", None).await.expect("assign");
        assert_eq!(variant, Variant::Control);
        engine
            .track_conversion("u2", "exp_pricing_test", ConversionInput { revenue: Some(29.0) })
            .await
            .expect("convert");
        let counters = engine
            .track_conversion("u2", "exp_pricing_test", ConversionInput { revenue: None })
            .await
            .expect("convert");
        assert_eq!(counters.control.conversions, 2);
        assert_eq!(counters.control.revenue, 29.0);
        assert_eq!(counters.control.views, 1);
    }

    #[test]
    fn report_rates_guard_against_zero_denominators() {
        let mut counters = ExperimentCounters::empty("exp");
        counters.control = VariantCounters {
            views: 0,
            conversions: 2,
            revenue: 0.0,
        };
        counters.experiment = VariantCounters {
            views: 4,
            conversions: 1,
            revenue: 30.0,
        };
        let report = ExperimentReport::from_counters(&counters);
        assert_eq!(report.control.conversion_rate, 0.0);
        assert_eq!(report.control.arpu, 0.0);
        assert_eq!(report.experiment.conversion_rate, 0.25);
        assert_eq!(report.experiment.arpu, 30.0);
        assert_eq!(report.summary.total_views, 4);
        assert_eq!(report.summary.total_conversions, 3);
        assert_eq!(report.summary.conversion_rate_diff, 0.25);
        assert_eq!(report.summary.arpu_diff, 30.0);
    }

    #[test]
    fn missing_experiment_serializes_as_sentinel() {
        let json = serde_json::to_value(ExperimentResults::not_found("exp_x")).expect("json");
        assert_eq!(json["experimentId"], "exp_x");
        assert_eq!(json["status"], "not_found");
    }

    #[tokio::test]
    async fn reset_clears_assignments_and_counters() {
        let engine = engine();
        for user in ["u1", "u2", "u3"] {
            engine.assign_variant(user, "exp", None).await.expect("assign");
        }
        assert_eq!(engine.list_assignments("exp").await.expect("list").len(), 3);
        assert_eq!(engine.reset_experiment("exp").await.expect("reset"), 3);
        assert!(engine.list_assignments("exp").await.expect("list").is_empty());
        assert!(!engine.get_experiment_results("exp").await.expect("results").is_found());
        assert!(engine.get_variant("u1", "exp").await.expect("get").is_none());
    }
}
