use serde::{Deserialize, Serialize};

use lastprice_core::assign::Variant;
use lastprice_core::CoreError;

/// What a user bucketed into one variant is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPricing {
    pub plan: String,
    pub price: f64,
    pub features: Vec<String>,
}

/// Per-variant pricing shown by the pricing endpoint.
///
/// Override with `LASTPRICE_PRICING_CATALOG`, e.g.
/// `{"control":{"plan":"Basic","price":19.0,"features":["A"]},"experiment":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingCatalog {
    pub control: VariantPricing,
    pub experiment: VariantPricing,
}

impl Default for PricingCatalog {
    fn default() -> Self {
        let base = ["Feature A", "Feature B", "Feature C"];
        Self {
            control: VariantPricing {
                plan: "Standard".to_string(),
                price: 29.99,
                features: base.iter().map(|f| f.to_string()).collect(),
            },
            experiment: VariantPricing {
                plan: "Premium".to_string(),
                price: 39.99,
                features: base
                    .iter()
                    .chain(["Feature D"].iter())
                    .map(|f| f.to_string())
                    .collect(),
            },
        }
    }
}

impl PricingCatalog {
    /// Built-in catalog, or the JSON override when one is configured.
    pub fn from_override(raw: Option<&str>) -> Result<Self, CoreError> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let catalog: PricingCatalog = serde_json::from_str(raw).map_err(|e| {
            CoreError::Configuration(format!("LASTPRICE_PRICING_CATALOG is not valid JSON: {e}"))
        })?;
        for (variant, entry) in [
            (Variant::Control, &catalog.control),
            (Variant::Experiment, &catalog.experiment),
        ] {
            if entry.plan.trim().is_empty() {
                return Err(CoreError::Configuration(format!(
                    "pricing catalog: {variant} plan name is empty"
                )));
            }
            if !entry.price.is_finite() || entry.price < 0.0 {
                return Err(CoreError::Configuration(format!(
                    "pricing catalog: {variant} price must be a non-negative number"
                )));
            }
        }
        Ok(catalog)
    }

    pub fn for_variant(&self, variant: Variant) -> &VariantPricing {
        match variant {
            Variant::Control => &self.control,
            Variant::Experiment => &self.experiment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog() {
        let catalog = PricingCatalog::default();
        assert_eq!(catalog.for_variant(Variant::Control).plan, "Standard");
        assert_eq!(catalog.for_variant(Variant::Control).price, 29.99);
        assert_eq!(catalog.for_variant(Variant::Experiment).features.len(), 4);
        assert_eq!(PricingCatalog::from_override(None).unwrap(), catalog);
    }

    #[test]
    fn override_is_validated() {
        let raw = r#"{"control":{"plan":"Basic","price":9.5,"features":[]},
                      "experiment":{"plan":"Plus","price":14,"features":["Priority"]}}"#;
        let catalog = PricingCatalog::from_override(Some(raw)).unwrap();
        assert_eq!(catalog.experiment.plan, "Plus");
        assert_eq!(catalog.experiment.price, 14.0);

        let negative = r#"{"control":{"plan":"Basic","price":-1,"features":[]},
                           "experiment":{"plan":"Plus","price":14,"features":[]}}"#;
        assert!(matches!(
            PricingCatalog::from_override(Some(negative)),
            Err(CoreError::Configuration(_))
        ));
        assert!(matches!(
            PricingCatalog::from_override(Some("{")),
            Err(CoreError::Configuration(_))
        ));
    }
}
