#![deny(clippy::unwrap_used)]

use actix::prelude::*;
use anyhow::Context as AnyhowContext;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

static DEFAULT_RATES_FILE: &str = "currency_rates.csv";

static RELOAD_RATE: std::time::Duration = std::time::Duration::from_secs(60 * 10);

/// Exchange rates against one base currency.
///
/// A rate is the amount of base currency one unit of the currency costs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateTable {
    base: String,
    rates: HashMap<String, Decimal>,
}

impl RateTable {
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into().trim().to_uppercase(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate<S: AsRef<str>>(mut self, currency: S, rate: Decimal) -> Self {
        self.insert(currency, rate);
        self
    }

    /// Non-positive rates are rejected, they would flip or break price ordering.
    pub fn insert<S: AsRef<str>>(&mut self, currency: S, rate: Decimal) -> bool {
        let currency = currency.as_ref().trim().to_uppercase();
        if rate <= Decimal::ZERO {
            log::warn!("Ignoring non-positive rate {rate} for {currency}");
            return false;
        }
        if currency == self.base {
            return false;
        }
        self.rates.insert(currency, rate);
        true
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        let currency = currency.trim().to_uppercase();
        if currency == self.base {
            return Some(Decimal::ONE);
        }
        self.rates.get(&currency).copied()
    }

    pub fn rates(&self) -> &HashMap<String, Decimal> {
        &self.rates
    }
}

/// Converts a base currency amount, rounded to cents half away from zero
/// (what SQLite's `ROUND` does, price filters compare against it).
pub fn from_base(amount: Decimal, rate: Decimal) -> Decimal {
    if rate <= Decimal::ZERO {
        return amount;
    }
    (amount / rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn rates_path() -> PathBuf {
    if let Ok(path) = std::env::var("CURRENCY_RATES_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            return dir.join(DEFAULT_RATES_FILE);
        }
    }
    PathBuf::from(DEFAULT_RATES_FILE)
}

pub fn parse_rates(input: &str, base: &str) -> Result<RateTable, anyhow::Error> {
    let mut table = RateTable::new(base);
    for (c, r) in input.lines().filter_map(|l| {
        let mut split = l.split(',');
        Some((split.next()?.trim(), split.next()?.trim()))
    }) {
        let rate = Decimal::from_str_exact(r)
            .context(format!("Unable to parse rate {r} for currency {c}"))?;
        table.insert(c, rate);
    }
    Ok(table)
}

pub fn read_rates(file: &Path, base: &str) -> Result<Option<RateTable>, anyhow::Error> {
    match std::fs::read_to_string(file) {
        Ok(input) => parse_rates(&input, base).map(Some),
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            Err(err).context("Unable to open currency rates file")
        }
        Err(_) => Ok(None),
    }
}

pub struct CurrencyService {
    rates: Arc<RwLock<RateTable>>,
    rates_path: PathBuf,
}

impl CurrencyService {
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self::with_path(base, rates_path())
    }

    pub fn with_path<S: Into<String>>(base: S, rates_path: PathBuf) -> Self {
        let base = base.into();
        let rates = match read_rates(&rates_path, &base) {
            Ok(rates) => rates,
            Err(err) => {
                log::warn!("Unable to read currency rates: {err}");
                None
            }
        }
        .unwrap_or_else(|| RateTable::new(base));
        Self {
            rates: Arc::new(RwLock::new(rates)),
            rates_path,
        }
    }
}

impl Actor for CurrencyService {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let rates = self.rates.clone();
        let rates_path = self.rates_path.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RELOAD_RATE).await;
                let base = rates.read().await.base().to_string();
                match read_rates(&rates_path, &base) {
                    Ok(Some(table)) => {
                        log::debug!("Reloaded {} currency rates", table.rates().len());
                        *rates.write().await = table;
                    }
                    Ok(None) => (),
                    Err(err) => log::error!("Unable to reload rates: {err}"),
                }
            }
        });
    }
}

#[derive(Message)]
#[rtype(result = "Option<Decimal>")]
pub struct GetRate(pub String);

impl Handler<GetRate> for CurrencyService {
    type Result = ResponseActFuture<Self, Option<Decimal>>;

    fn handle(&mut self, GetRate(currency): GetRate, _: &mut Self::Context) -> Self::Result {
        let rates = self.rates.clone();
        Box::pin(async move { rates.read().await.rate(&currency) }.into_actor(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn base_currency_has_unit_rate() {
        let table = RateTable::new("uah").with_rate("usd", dec!(41.5));
        assert_eq!(table.rate("UAH"), Some(Decimal::ONE));
        assert_eq!(table.rate("usd"), Some(dec!(41.5)));
        assert_eq!(table.rate("EUR"), None);
    }

    #[test]
    fn rejects_non_positive_rates() {
        let mut table = RateTable::new("UAH");
        assert!(!table.insert("USD", Decimal::ZERO));
        assert!(!table.insert("EUR", dec!(-1)));
        assert!(table.rates().is_empty());
    }

    #[test]
    fn converts_after_selection() {
        assert_eq!(from_base(dec!(1000), dec!(40)), dec!(25));
        assert_eq!(from_base(dec!(1000), dec!(3)), dec!(333.33));
        assert_eq!(from_base(dec!(900), dec!(7)), dec!(128.57));
        // half a cent goes up, as in SQLite
        assert_eq!(from_base(dec!(1), dec!(8)), dec!(0.13));
    }

    #[test]
    fn parses_rates_file() {
        let table = parse_rates("USD,41.5\nEUR, 45.10\n\nbroken\n", "UAH").unwrap();
        assert_eq!(table.rate("EUR"), Some(dec!(45.10)));
        assert_eq!(table.rate("USD"), Some(dec!(41.5)));
        assert!(parse_rates("USD,abc", "UAH").is_err());
    }

    #[actix::test]
    async fn service_answers_rates_from_file() {
        let path = std::env::temp_dir().join(format!("rates-{}.csv", std::process::id()));
        std::fs::write(&path, "USD,41.5\n").unwrap();
        let service = CurrencyService::with_path("UAH", path.clone()).start();
        assert_eq!(service.send(GetRate("usd".to_string())).await.unwrap(), Some(dec!(41.5)));
        assert_eq!(service.send(GetRate("UAH".to_string())).await.unwrap(), Some(Decimal::ONE));
        assert_eq!(service.send(GetRate("EUR".to_string())).await.unwrap(), None);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read_rates(&path, "UAH").unwrap(), None);
    }
}
