//! Pricing tier catalog.
//!
//! Plain data consumed by the storefront's pricing surface. Annual billing
//! carries a flat 20% discount, rounded to the nearest whole unit the way the
//! storefront has always displayed it.

use serde::Serialize;

use crate::wallet::PaymentCheckout;

pub const ANNUAL_DISCOUNT: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    pub name: &'static str,
    pub description: &'static str,
    pub monthly_price: f64,
    pub annual_price: f64,
    pub memo: &'static str,
    pub features: &'static [&'static str],
    pub popular: bool,
}

impl PricingTier {
    #[must_use]
    pub fn price(&self, period: BillingPeriod) -> f64 {
        match period {
            BillingPeriod::Monthly => self.monthly_price,
            BillingPeriod::Annual => self.annual_price,
        }
    }

    /// Build the wallet checkout for this tier and billing period.
    #[must_use]
    pub fn checkout(&self, period: BillingPeriod) -> PaymentCheckout {
        PaymentCheckout {
            amount: self.price(period),
            memo: self.memo.to_string(),
            metadata: serde_json::json!({
                "tier": self.name,
                "period": period,
            }),
        }
    }
}

fn annual_price(monthly: f64) -> f64 {
    (monthly * 12.0 * (1.0 - ANNUAL_DISCOUNT)).round()
}

#[must_use]
pub fn catalog() -> Vec<PricingTier> {
    vec![
        PricingTier {
            name: "Basic",
            description: "Essential verification for small businesses",
            monthly_price: 1.0,
            annual_price: annual_price(1.0),
            memo: "Basic Verification Plan",
            features: &[
                "5 verifications per month",
                "Standard processing speed",
                "Email support",
                "Basic analytics",
            ],
            popular: false,
        },
        PricingTier {
            name: "Professional",
            description: "Advanced features for growing businesses",
            monthly_price: 5.0,
            annual_price: annual_price(5.0),
            memo: "Professional Verification Plan",
            features: &[
                "50 verifications per month",
                "Priority processing",
                "API access",
                "Detailed analytics",
                "Batch verification",
                "24/7 support",
            ],
            popular: true,
        },
        PricingTier {
            name: "Enterprise",
            description: "Unlimited power for large organizations",
            monthly_price: 20.0,
            annual_price: annual_price(20.0),
            memo: "Enterprise Verification Plan",
            features: &[
                "Unlimited verifications",
                "Instant processing",
                "Full API access",
                "Custom integrations",
                "Dedicated account manager",
                "SLA guarantee",
                "White-label options",
            ],
            popular: false,
        },
    ]
}
