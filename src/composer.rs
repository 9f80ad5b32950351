//! Catalogue page assembly.
//!
//! One request walks tenant resolution, the permission gate, cached rubric
//! metadata, filter parsing and query building, then runs the product page,
//! the total count and the facet panel concurrently. The whole pipeline runs
//! under a deadline and a cancellation token; it either yields a full
//! [`CataloguePage`] or fails.

use crate::facet::{Facet, FacetAggregator, FacetContext};
use crate::filter::{self, FilterSet, IgnoredSegment, Selection, SortKey};
use crate::metadata::{MetadataCache, RubricMeta};
use crate::price::{self, PriceRange, PriceResolver, RateSource};
use crate::product_summary::ProductListing;
use crate::query::{self, QueryScope};
use catalogue_types::tenant::{PermissionGate, SessionHints, TenantResolver, TenantScope};
use catalogue_types::LocalizedName;
use derive_more::{Display, Error};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Display, Error)]
pub enum CatalogueError {
    #[display("Rubric not found")]
    NotFound,
    #[display("Rubric is not visible for this tenant")]
    Forbidden,
    #[error(ignore)]
    #[display("Unable to compose catalogue page: {_0:?}")]
    Aggregation(anyhow::Error),
    #[display("Catalogue request cancelled")]
    Cancelled,
    #[display("Catalogue request deadline exceeded")]
    Timeout,
}

impl From<anyhow::Error> for CatalogueError {
    fn from(err: anyhow::Error) -> Self {
        Self::Aggregation(err)
    }
}

#[derive(Clone, Debug)]
pub struct ComposerSettings {
    pub page_size: u32,
    pub timeout: Duration,
    pub base_currency: String,
    pub fallback_locale: String,
    /// List only products with an available offer in the tenant's city
    pub in_stock_only: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogueRequest {
    /// `/<rubric>/<segment>/<segment>...`
    pub path: String,
    pub session: SessionHints,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProductListItem {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    /// In the requested currency, `None` when nothing is on sale in scope
    pub price: Option<PriceRange>,
    pub created_at: i64,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Breadcrumb {
    pub name: String,
    pub href: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RubricHeader {
    pub slug: String,
    pub name: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct CataloguePage {
    pub rubric: RubricHeader,
    pub products: Vec<ProductListItem>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub facets: Vec<Facet>,
    pub total_count: u64,
    pub current_page: u32,
    pub page_count: u32,
    pub page_size: u32,
    pub sort: SortKey,
    pub currency: String,
    pub canonical: String,
    pub ignored_segments: Vec<IgnoredSegment>,
}

pub struct CatalogueComposer {
    metadata: Arc<MetadataCache>,
    listing: Arc<dyn ProductListing>,
    facets: FacetAggregator,
    prices: Arc<dyn PriceResolver>,
    rates: Arc<dyn RateSource>,
    tenants: Arc<dyn TenantResolver>,
    gate: Arc<dyn PermissionGate>,
    settings: ComposerSettings,
}

impl CatalogueComposer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<MetadataCache>,
        listing: Arc<dyn ProductListing>,
        facets: FacetAggregator,
        prices: Arc<dyn PriceResolver>,
        rates: Arc<dyn RateSource>,
        tenants: Arc<dyn TenantResolver>,
        gate: Arc<dyn PermissionGate>,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            metadata,
            listing,
            facets,
            prices,
            rates,
            tenants,
            gate,
            settings,
        }
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub async fn compose(
        &self,
        request: &CatalogueRequest,
        token: CancellationToken,
    ) -> Result<CataloguePage, CatalogueError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::debug!("Catalogue request {} cancelled", request.path);
                Err(CatalogueError::Cancelled)
            }
            res = tokio::time::timeout(self.settings.timeout, self.run(request)) => match res {
                Ok(res) => res,
                Err(_) => {
                    log::warn!(
                        "Catalogue request {} exceeded {:?}",
                        request.path,
                        self.settings.timeout
                    );
                    Err(CatalogueError::Timeout)
                }
            },
        }
    }

    async fn run(&self, request: &CatalogueRequest) -> Result<CataloguePage, CatalogueError> {
        let mut segments = request.path.split('/').filter(|s| !s.trim().is_empty());
        let rubric_slug = segments.next().ok_or(CatalogueError::NotFound)?;
        let tenant = self.tenants.resolve(&request.session);
        let meta = self
            .metadata
            .get(rubric_slug)
            .await?
            .ok_or(CatalogueError::NotFound)?;
        if !self.gate.rubric_visible(&meta.rubric, &tenant).await {
            return Err(CatalogueError::Forbidden);
        }
        let prices =
            price::price_scope(self.rates.as_ref(), &tenant, &self.settings.base_currency).await?;

        let parsed = filter::parse(segments, &meta.attributes);
        let filters = parsed.filters;
        let query = query::build(
            &filters,
            &QueryScope {
                rubric_id: meta.rubric.id,
                require_offer: self.settings.in_stock_only,
            },
            &meta.attributes,
        );

        let page_size = self.settings.page_size.max(1);
        let current_page = filters.page();
        let offset = u64::from(current_page - 1) * u64::from(page_size);
        let ctx = FacetContext {
            rubric_slug: &meta.rubric.slug,
            locale: &tenant.locale,
            fallback_locale: &self.settings.fallback_locale,
            prices: &prices,
        };
        let (total_count, summaries, facets) = tokio::try_join!(
            self.listing.count(&query, &prices),
            self.listing
                .page(&query, &prices, filters.sort(), offset, u64::from(page_size)),
            self.facets.compute(&meta.attributes, &filters, &query, &ctx),
        )?;

        let ids = summaries.iter().map(|p| p.id).collect::<Vec<_>>();
        let resolved = self.prices.resolve_many(&ids, &prices).await?;
        let products = summaries
            .into_iter()
            .map(|p| {
                let price = resolved.get(&p.id).map(|r| prices.convert(*r));
                ProductListItem {
                    name: self.localized(&p.name, &tenant).to_string(),
                    id: p.id,
                    slug: p.slug,
                    brand: p.brand,
                    manufacturer: p.manufacturer,
                    price,
                    created_at: p.created_at.unix_timestamp(),
                }
            })
            .collect();

        let page_count = page_count(total_count, page_size);
        log::debug!(
            "Catalogue {}: {total_count} products, page {current_page}/{page_count}, {} ignored segments",
            request.path,
            parsed.ignored.len()
        );
        Ok(CataloguePage {
            rubric: RubricHeader {
                slug: meta.rubric.slug.clone(),
                name: self.localized(&meta.rubric.name, &tenant).to_string(),
            },
            products,
            breadcrumbs: self.breadcrumbs(&meta, &filters, &tenant),
            facets,
            total_count,
            current_page,
            page_count,
            page_size,
            sort: filters.sort(),
            currency: prices.currency.clone(),
            canonical: filters.to_path(&meta.rubric.slug),
            ignored_segments: parsed.ignored,
        })
    }

    fn localized<'a>(
        &self,
        name: &'a LocalizedName,
        tenant: &TenantScope,
    ) -> &'a str {
        name.get(&tenant.locale, &self.settings.fallback_locale)
    }

    /// Rubric first, then every applied selection in panel order. A single
    /// selected option expands into its ancestor path; each crumb links to the
    /// filters accumulated up to it.
    fn breadcrumbs(
        &self,
        meta: &RubricMeta,
        filters: &FilterSet,
        tenant: &TenantScope,
    ) -> Vec<Breadcrumb> {
        let rubric_slug = &meta.rubric.slug;
        let mut crumbs = vec![Breadcrumb {
            name: self.localized(&meta.rubric.name, tenant).to_string(),
            href: FilterSet::default().to_path(rubric_slug),
        }];
        let mut applied = FilterSet::default();
        for attribute in meta.attributes.iter() {
            let slug = attribute.slug();
            match filters.selection(slug) {
                Some(Selection::Options(options)) if options.len() == 1 => {
                    let Some(option) = options.iter().next() else {
                        continue;
                    };
                    for ancestor in attribute.tree.ancestor_path(option) {
                        let mut step = applied.clone();
                        step.select_option(slug, ancestor.slug.clone());
                        crumbs.push(Breadcrumb {
                            name: self.localized(&ancestor.name, tenant).to_string(),
                            href: step.to_path(rubric_slug),
                        });
                    }
                    applied.select_option(slug, option.clone());
                }
                Some(Selection::Options(options)) => {
                    let names = options
                        .iter()
                        .filter_map(|o| attribute.tree.find_by_slug(o))
                        .map(|o| self.localized(&o.name, tenant))
                        .collect::<Vec<_>>()
                        .join(", ");
                    for option in options {
                        applied.select_option(slug, option.clone());
                    }
                    crumbs.push(Breadcrumb {
                        name: format!(
                            "{}: {names}",
                            self.localized(&attribute.attribute.name, tenant)
                        ),
                        href: applied.to_path(rubric_slug),
                    });
                }
                Some(Selection::Ranges(ranges)) => {
                    let metric = attribute.attribute.metric.as_deref().unwrap_or_default();
                    let bounds = ranges
                        .iter()
                        .map(|r| format!("{}-{}{metric}", r.lower(), r.upper()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    for range in ranges {
                        applied.select_range(slug, *range);
                    }
                    crumbs.push(Breadcrumb {
                        name: format!(
                            "{} {bounds}",
                            self.localized(&attribute.attribute.name, tenant)
                        ),
                        href: applied.to_path(rubric_slug),
                    });
                }
                None => (),
            }
        }
        crumbs
    }
}

/// At least one page, so an empty result still has a page to show.
pub fn page_count(total: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}
