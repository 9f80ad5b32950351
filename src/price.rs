use actix::Addr;
use async_trait::async_trait;
use catalogue_types::tenant::TenantScope;
use currency_service::{from_base, CurrencyService, GetRate, RateTable};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

/// Where offers are looked up and which currency prices are shown in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceScope {
    pub city: String,
    pub company: Option<String>,
    pub currency: String,
    /// Base currency units per unit of `currency`
    pub rate: Decimal,
}

impl PriceScope {
    pub fn new(tenant: &TenantScope, currency: String, rate: Decimal) -> Self {
        Self {
            city: tenant.city.clone(),
            company: tenant.company.clone(),
            currency,
            rate,
        }
    }

    pub fn from_base(&self, amount: Decimal) -> Decimal {
        from_base(amount, self.rate)
    }

    /// Converts a range selected in base currency.
    pub fn convert(&self, range: PriceRange) -> PriceRange {
        PriceRange {
            min: self.from_base(range.min),
            max: self.from_base(range.max),
        }
    }
}

/// Min and max offer price per product, in base currency.
///
/// Only available offers with a positive price in the scope's city (and
/// company, when set) count. A missing entry means the product has no offer
/// in scope, which is different from a zero price.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    async fn resolve_many(
        &self,
        products: &[Uuid],
        scope: &PriceScope,
    ) -> Result<HashMap<Uuid, PriceRange>, anyhow::Error>;

    async fn resolve(
        &self,
        product: Uuid,
        scope: &PriceScope,
    ) -> Result<Option<PriceRange>, anyhow::Error> {
        Ok(self.resolve_many(&[product], scope).await?.remove(&product))
    }
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn rate(&self, currency: &str) -> Result<Option<Decimal>, anyhow::Error>;
}

#[async_trait]
impl RateSource for Addr<CurrencyService> {
    async fn rate(&self, currency: &str) -> Result<Option<Decimal>, anyhow::Error> {
        Ok(self.send(GetRate(currency.to_string())).await?)
    }
}

#[async_trait]
impl RateSource for RateTable {
    async fn rate(&self, currency: &str) -> Result<Option<Decimal>, anyhow::Error> {
        Ok(RateTable::rate(self, currency))
    }
}

/// Price scope for a tenant; unknown currencies fall back to the base currency.
pub async fn price_scope(
    rates: &dyn RateSource,
    tenant: &TenantScope,
    base_currency: &str,
) -> Result<PriceScope, anyhow::Error> {
    if tenant.currency.eq_ignore_ascii_case(base_currency) {
        return Ok(PriceScope::new(tenant, base_currency.to_string(), Decimal::ONE));
    }
    match rates.rate(&tenant.currency).await? {
        Some(rate) if rate > Decimal::ZERO => {
            Ok(PriceScope::new(tenant, tenant.currency.clone(), rate))
        }
        _ => {
            log::warn!(
                "No rate for {}, showing prices in {base_currency}",
                tenant.currency
            );
            Ok(PriceScope::new(tenant, base_currency.to_string(), Decimal::ONE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tenant(currency: &str) -> TenantScope {
        TenantScope {
            city: "kyiv".to_string(),
            company: None,
            currency: currency.to_string(),
            locale: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn scope_uses_known_rate() {
        let rates = RateTable::new("UAH").with_rate("USD", dec!(40));
        let scope = price_scope(&rates, &tenant("USD"), "UAH").await.unwrap();
        assert_eq!(scope.currency, "USD");
        assert_eq!(scope.rate, dec!(40));
        assert_eq!(
            scope.convert(PriceRange {
                min: dec!(1000),
                max: dec!(1999)
            }),
            PriceRange {
                min: dec!(25),
                max: dec!(49.98)
            }
        );
    }

    #[tokio::test]
    async fn unknown_currency_falls_back_to_base() {
        let rates = RateTable::new("UAH");
        let scope = price_scope(&rates, &tenant("XYZ"), "UAH").await.unwrap();
        assert_eq!(scope.currency, "UAH");
        assert_eq!(scope.rate, Decimal::ONE);
        let base = price_scope(&rates, &tenant("uah"), "UAH").await.unwrap();
        assert_eq!(base.currency, "UAH");
    }
}
