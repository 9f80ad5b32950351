use crate::rubric::Rubric;
use async_trait::async_trait;
use serde::Serialize;

/// City, company, currency and locale a catalogue request is answered for.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TenantScope {
    pub city: String,
    /// `None` lists offers of every company in the city
    pub company: Option<String>,
    pub currency: String,
    pub locale: String,
}

/// Raw values a session carries, before defaults are applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionHints {
    pub city: Option<String>,
    pub company: Option<String>,
    pub currency: Option<String>,
    pub locale: Option<String>,
}

pub trait TenantResolver: Send + Sync {
    fn resolve(&self, hints: &SessionHints) -> TenantScope;
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn rubric_visible(&self, rubric: &Rubric, tenant: &TenantScope) -> bool;
}

/// Applies session hints over configured defaults.
pub struct DefaultTenantResolver {
    defaults: TenantScope,
}

impl DefaultTenantResolver {
    pub fn new(defaults: TenantScope) -> Self {
        Self { defaults }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl TenantResolver for DefaultTenantResolver {
    fn resolve(&self, hints: &SessionHints) -> TenantScope {
        TenantScope {
            city: non_empty(&hints.city)
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| self.defaults.city.clone()),
            company: non_empty(&hints.company)
                .map(|c| c.to_lowercase())
                .or_else(|| self.defaults.company.clone()),
            currency: non_empty(&hints.currency)
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| self.defaults.currency.clone()),
            locale: non_empty(&hints.locale)
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| self.defaults.locale.clone()),
        }
    }
}

/// Visibility based on the rubric's own flags, used when no role model is wired.
pub struct ActiveRubricGate;

#[async_trait]
impl PermissionGate for ActiveRubricGate {
    async fn rubric_visible(&self, rubric: &Rubric, _: &TenantScope) -> bool {
        rubric.active && rubric.show_in_filter
    }
}
