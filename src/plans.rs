// src/plans.rs
//
// Maps Stripe price ids onto the platform's plan catalog. Price ids come
// from the environment; the centavo amounts are the published plan prices
// and back the fallback heuristic for price ids we don't recognize.

pub const TRIAL_UNIT_AMOUNT: i64 = 100;
pub const MONTHLY_UNIT_AMOUNT: i64 = 3_490;
pub const ANNUAL_UNIT_AMOUNT: i64 = 34_900;

pub const UNKNOWN_PLAN_NAME: &str = "Desconhecido";

#[derive(Debug, Clone)]
pub struct Plan {
    pub price_id: String,
    pub name: &'static str,
    pub display_price: &'static str,
    pub unit_amount: i64,
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    pub trial: Plan,
    pub monthly: Plan,
    pub annual: Plan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanMatch {
    pub plan_name: String,
    pub plan_price: Option<String>,
}

impl PlanCatalog {
    pub fn new(trial_price_id: String, monthly_price_id: String, annual_price_id: String) -> Self {
        PlanCatalog {
            trial: Plan {
                price_id: trial_price_id,
                name: "Teste",
                display_price: "1.00",
                unit_amount: TRIAL_UNIT_AMOUNT,
            },
            monthly: Plan {
                price_id: monthly_price_id,
                name: "Mensal",
                display_price: "34.90",
                unit_amount: MONTHLY_UNIT_AMOUNT,
            },
            annual: Plan {
                price_id: annual_price_id,
                name: "Anual",
                display_price: "349.00",
                unit_amount: ANNUAL_UNIT_AMOUNT,
            },
        }
    }

    fn all(&self) -> [&Plan; 3] {
        [&self.trial, &self.monthly, &self.annual]
    }

    /// Checkout plan selector: `trial` | `monthly` | `annual`.
    pub fn by_plan_type(&self, plan_type: &str) -> Option<&Plan> {
        match plan_type {
            "trial" => Some(&self.trial),
            "monthly" => Some(&self.monthly),
            "annual" => Some(&self.annual),
            _ => None,
        }
    }

    /// Identifies a plan from a provider subscription. Price id match
    /// first; an unmatched id falls back to the amount heuristic; if that
    /// also fails the plan is "Desconhecido" with the provider amount as
    /// the displayed price.
    pub fn identify(&self, price_id: Option<&str>, unit_amount: Option<i64>) -> PlanMatch {
        if let Some(price_id) = price_id {
            if let Some(plan) = self.all().iter().find(|p| p.price_id == price_id) {
                return PlanMatch {
                    plan_name: plan.name.to_string(),
                    plan_price: Some(plan.display_price.to_string()),
                };
            }
        }

        if let Some(amount) = unit_amount {
            if let Some(plan) = self.all().iter().find(|p| p.unit_amount == amount) {
                log::warn!(
                    "plan identified by amount heuristic amount={} plan={}",
                    amount,
                    plan.name
                );
                return PlanMatch {
                    plan_name: plan.name.to_string(),
                    plan_price: Some(plan.display_price.to_string()),
                };
            }
        }

        PlanMatch {
            plan_name: UNKNOWN_PLAN_NAME.to_string(),
            plan_price: unit_amount.map(|a| format!("{}.{:02}", a / 100, a % 100)),
        }
    }
}
