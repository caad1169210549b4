use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreResult;
use crate::tenant::Plan;
use crate::usage::{UsageSummary, UsageTracker};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPricing {
    pub plan: Plan,
    pub monthly_base: f64,
    pub included_usage: u64,
    pub overage_rate_per_1000: f64,
    pub features: &'static [&'static str],
}

static PLAN_PRICING: [PlanPricing; 4] = [
    PlanPricing {
        plan: Plan::Free,
        monthly_base: 0.0,
        included_usage: 1_000,
        overage_rate_per_1000: 0.0,
        features: &[
            "Up to 1,000 signals/month",
            "1 active experiment",
            "Basic analytics",
            "Community support",
        ],
    },
    PlanPricing {
        plan: Plan::Starter,
        monthly_base: 29.0,
        included_usage: 10_000,
        overage_rate_per_1000: 0.10,
        features: &[
            "Up to 10,000 signals/month",
            "5 active experiments",
            "Advanced analytics",
            "Email support",
            "API access",
        ],
    },
    PlanPricing {
        plan: Plan::Pro,
        monthly_base: 99.0,
        included_usage: 100_000,
        overage_rate_per_1000: 0.05,
        features: &[
            "Up to 100,000 signals/month",
            "Unlimited experiments",
            "Full analytics suite",
            "Priority support",
            "API access",
            "Webhooks",
            "Custom integrations",
        ],
    },
    PlanPricing {
        plan: Plan::Enterprise,
        monthly_base: 499.0,
        included_usage: 1_000_000,
        overage_rate_per_1000: 0.02,
        features: &[
            "Up to 1,000,000 signals/month",
            "Unlimited experiments",
            "Full analytics suite",
            "Dedicated support",
            "API access",
            "Webhooks",
            "Custom integrations",
            "SLA guarantees",
            "Custom contracts",
        ],
    },
];

pub fn plan_pricing(plan: Plan) -> &'static PlanPricing {
    match plan {
        Plan::Free => &PLAN_PRICING[0],
        Plan::Starter => &PLAN_PRICING[1],
        Plan::Pro => &PLAN_PRICING[2],
        Plan::Enterprise => &PLAN_PRICING[3],
    }
}

/// Every plan in table order.
pub fn all_plans() -> &'static [PlanPricing] {
    &PLAN_PRICING
}

pub fn estimate_monthly_cost(plan: Plan, projected_usage: u64) -> f64 {
    let pricing = plan_pricing(plan);
    let overage = projected_usage.saturating_sub(pricing.included_usage);
    pricing.monthly_base + overage as f64 / 1000.0 * pricing.overage_rate_per_1000
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub tenant_id: String,
    pub plan: Plan,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub base_cost: f64,
    pub usage_summary: UsageSummary,
    pub overage_charges: f64,
    pub total_amount: f64,
    pub line_items: Vec<LineItem>,
}

impl Invoice {
    pub fn from_summary(summary: UsageSummary) -> Self {
        let pricing = plan_pricing(summary.plan);
        let mut line_items = vec![LineItem {
            description: format!("{} Plan - Monthly", summary.plan.display_name()),
            amount: pricing.monthly_base,
        }];

        let mut overage_charges = 0.0;
        if summary.overage > 0 && pricing.overage_rate_per_1000 > 0.0 {
            overage_charges = summary.overage_charges;
            line_items.push(LineItem {
                description: format!(
                    "Overage: {} additional signals",
                    group_thousands(summary.overage)
                ),
                amount: overage_charges,
            });
        }

        Self {
            tenant_id: summary.tenant_id.clone(),
            plan: summary.plan,
            period_start: summary.period_start,
            period_end: summary.period_end,
            base_cost: pricing.monthly_base,
            overage_charges,
            total_amount: pricing.monthly_base + overage_charges,
            line_items,
            usage_summary: summary,
        }
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCost {
    pub plan: Plan,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecommendation {
    pub recommended: Plan,
    pub estimated_cost: f64,
    pub alternatives: Vec<PlanCost>,
}

pub fn recommend_plan(projected_usage: u64) -> PlanRecommendation {
    let mut costs: Vec<PlanCost> = Plan::ALL
        .iter()
        .map(|&plan| PlanCost {
            plan,
            cost: estimate_monthly_cost(plan, projected_usage),
        })
        .collect();
    // Stable sort keeps table order between equal costs.
    costs.sort_by(|a, b| a.cost.total_cmp(&b.cost));

    let free_included = plan_pricing(Plan::Free).included_usage;
    let recommended = costs
        .iter()
        .find(|c| !(c.plan == Plan::Free && projected_usage > free_included))
        .unwrap_or(&costs[0])
        .clone();

    PlanRecommendation {
        recommended: recommended.plan,
        estimated_cost: recommended.cost,
        alternatives: costs
            .into_iter()
            .filter(|c| c.plan != recommended.plan)
            .collect(),
    }
}

#[derive(Clone)]
pub struct BillingCalculator {
    tracker: UsageTracker,
}

impl BillingCalculator {
    pub fn new(tracker: UsageTracker) -> Self {
        Self { tracker }
    }

    pub async fn calculate_monthly_bill(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Invoice> {
        let summary = self.tracker.get_usage_summary(tenant_id, start, end).await?;
        Ok(Invoice::from_summary(summary))
    }
}
