use crate::composer::ComposerSettings;
use anyhow::Context;
use catalogue_types::tenant::TenantScope;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogueConfig {
    pub db_path: String,
    pub listen_addr: String,
    pub listen_port: u16,
    pub page_size: u32,
    pub metadata_ttl: Duration,
    pub request_timeout: Duration,
    pub in_stock_only: bool,
    pub default_city: String,
    pub default_company: Option<String>,
    pub default_locale: String,
    pub base_currency: String,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            db_path: "storage/catalogue.db".to_string(),
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            page_size: 24,
            metadata_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(5),
            in_stock_only: true,
            default_city: "kyiv".to_string(),
            default_company: None,
            default_locale: "uk".to_string(),
            base_currency: "UAH".to_string(),
        }
    }
}

/// Missing keys keep the default, malformed ones are an error.
fn get_or<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if !envmnt::exists(key) {
        return Ok(default);
    }
    let raw = envmnt::get_or(key, "");
    raw.trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("Invalid {key} value {raw}: {err}"))
}

fn optional(key: &str) -> Option<String> {
    let value = envmnt::get_or(key, "");
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl CatalogueConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let d = Self::default();
        let page_size: u32 = get_or("PAGE_SIZE", d.page_size)?;
        if page_size == 0 {
            return Err(anyhow::anyhow!("PAGE_SIZE must be positive"));
        }
        Ok(Self {
            db_path: get_or("CATALOGUE_DB_PATH", d.db_path)?,
            listen_addr: get_or("LISTEN_ADDR", d.listen_addr)?,
            listen_port: get_or("LISTEN_PORT", d.listen_port)?,
            page_size,
            metadata_ttl: Duration::from_secs(
                get_or("METADATA_TTL_SECS", d.metadata_ttl.as_secs())
                    .context("Unable to read metadata TTL")?,
            ),
            request_timeout: Duration::from_millis(
                get_or("REQUEST_TIMEOUT_MS", d.request_timeout.as_millis() as u64)
                    .context("Unable to read request timeout")?,
            ),
            in_stock_only: get_or("IN_STOCK_ONLY", d.in_stock_only)?,
            default_city: get_or("DEFAULT_CITY", d.default_city)?.to_lowercase(),
            default_company: optional("DEFAULT_COMPANY").map(|c| c.to_lowercase()),
            default_locale: get_or("DEFAULT_LOCALE", d.default_locale)?.to_lowercase(),
            base_currency: get_or("BASE_CURRENCY", d.base_currency)?.to_uppercase(),
        })
    }

    pub fn default_tenant(&self) -> TenantScope {
        TenantScope {
            city: self.default_city.clone(),
            company: self.default_company.clone(),
            currency: self.base_currency.clone(),
            locale: self.default_locale.clone(),
        }
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            page_size: self.page_size,
            timeout: self.request_timeout,
            base_currency: self.base_currency.clone(),
            fallback_locale: self.default_locale.clone(),
            in_stock_only: self.in_stock_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_keeps_defaults() {
        envmnt::set("PAGE_SIZE", "12");
        envmnt::set("BASE_CURRENCY", "usd");
        envmnt::set("DEFAULT_COMPANY", " ");
        let config = CatalogueConfig::from_env().unwrap();
        assert_eq!(config.page_size, 12);
        assert_eq!(config.base_currency, "USD");
        assert_eq!(config.default_company, None);
        assert_eq!(config.metadata_ttl, CatalogueConfig::default().metadata_ttl);

        let tenant = config.default_tenant();
        assert_eq!(tenant.currency, "USD");
        assert_eq!(config.composer_settings().page_size, 12);

        envmnt::set("PAGE_SIZE", "many");
        assert!(CatalogueConfig::from_env().is_err());
        envmnt::set("PAGE_SIZE", "0");
        assert!(CatalogueConfig::from_env().is_err());
        envmnt::remove("PAGE_SIZE");
        envmnt::remove("BASE_CURRENCY");
        envmnt::remove("DEFAULT_COMPANY");
    }
}
