use sea_orm::prelude::Decimal;
use std::collections::BTreeMap;

use crate::enums::{ Forecast, PrizeCategory };
use crate::providers::ForecastParam;

/// Payout per unit staked on a forecast that lands in `category`.
pub fn multiplier(category: PrizeCategory, forecast: Forecast) -> Decimal {
    let value: i64 = match (forecast, category) {
        (Forecast::Big, PrizeCategory::First) => 2500,
        (Forecast::Big, PrizeCategory::Second) => 1000,
        (Forecast::Big, PrizeCategory::Third) => 500,
        (Forecast::Big, PrizeCategory::Special) => 180,
        (Forecast::Big, PrizeCategory::Consolation) => 60,
        (Forecast::Small, PrizeCategory::First) => 3500,
        (Forecast::Small, PrizeCategory::Second) => 2000,
        (Forecast::Small, PrizeCategory::Third) => 1000,
        // Small forecasts only cover the top three prizes
        (Forecast::Small, PrizeCategory::Special | PrizeCategory::Consolation) => 0,
    };
    Decimal::from(value)
}

/// Loyalty points per unit staked, regardless of forecast.
pub fn points_per_unit(category: PrizeCategory) -> Decimal {
    let value: i64 = match category {
        PrizeCategory::First => 50_000_000,
        PrizeCategory::Second => 20_000_000,
        PrizeCategory::Third => 10_000_000,
        PrizeCategory::Special => 3_000_000,
        PrizeCategory::Consolation => 1_000_000,
    };
    Decimal::from(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrizeAward {
    pub claim_amount: Decimal,
    pub point_amount: Decimal,
}

impl PrizeAward {
    pub fn is_empty(&self) -> bool {
        self.claim_amount.is_zero() && self.point_amount.is_zero()
    }
}

/// Winnings and points for one bet order hitting `category`.
pub fn award(category: PrizeCategory, big_amount: Decimal, small_amount: Decimal) -> PrizeAward {
    PrizeAward {
        claim_amount: big_amount * multiplier(category, Forecast::Big) +
        small_amount * multiplier(category, Forecast::Small),
        point_amount: (big_amount + small_amount) * points_per_unit(category),
    }
}

/// Merge identical `(epoch, number, forecast)` entries by summing amounts;
/// the contract settles each tuple once.
pub fn dedupe_params(params: impl IntoIterator<Item = ForecastParam>) -> Vec<ForecastParam> {
    let mut merged: BTreeMap<(i64, String, Forecast), Decimal> = BTreeMap::new();
    for param in params {
        if param.amount.is_zero() {
            continue;
        }
        *merged.entry((param.epoch, param.number, param.forecast)).or_default() += param.amount;
    }

    merged
        .into_iter()
        .map(|((epoch, number, forecast), amount)| ForecastParam { epoch, number, forecast, amount })
        .collect()
}
