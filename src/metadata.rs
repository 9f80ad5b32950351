use crate::option_tree::OptionTree;
use anyhow::Context;
use catalogue_types::attribute::{
    Attribute, AttributeRepository, AttributeVariant, ByAttribute, InGroups,
};
use catalogue_types::product::ProductSummaryRepository;
use catalogue_types::rubric::{Rubric, RubricRepository};
use log_error::LogError;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use typesafe_repository::async_ops::Select;

#[derive(Clone, Debug)]
pub struct CatalogueAttribute {
    pub attribute: Attribute,
    /// Empty for numeric and text attributes
    pub tree: OptionTree,
}

impl CatalogueAttribute {
    pub fn slug(&self) -> &str {
        &self.attribute.slug
    }

    pub fn is_filterable(&self) -> bool {
        self.attribute.show_in_catalogue_filter && self.attribute.variant != AttributeVariant::Text
    }
}

/// Attributes of one rubric in filter panel order.
#[derive(Clone, Debug, Default)]
pub struct AttributeSet {
    attributes: Vec<CatalogueAttribute>,
    by_slug: HashMap<String, usize>,
}

impl AttributeSet {
    pub fn new(attributes: Vec<CatalogueAttribute>) -> Self {
        let mut res = Self::default();
        for attribute in attributes {
            if res.by_slug.contains_key(attribute.slug()) {
                log::warn!(
                    "Attribute slug {} is used twice, keeping the first one",
                    attribute.slug()
                );
                continue;
            }
            res.by_slug
                .insert(attribute.slug().to_string(), res.attributes.len());
            res.attributes.push(attribute);
        }
        res
    }

    pub fn get(&self, slug: &str) -> Option<&CatalogueAttribute> {
        self.by_slug.get(slug).map(|&i| &self.attributes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogueAttribute> {
        self.attributes.iter()
    }

    pub fn filterable(&self) -> impl Iterator<Item = &CatalogueAttribute> {
        self.attributes.iter().filter(|a| a.is_filterable())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RubricMeta {
    pub rubric: Rubric,
    pub attributes: AttributeSet,
}

struct MetaCacheEntry {
    meta: Arc<RubricMeta>,
    cached_at: Instant,
}

/// Read-mostly rubric metadata shared by all requests.
///
/// Entries expire after `ttl` and can be dropped early with [`MetadataCache::invalidate`]
/// after CMS writes. Product data is never cached here.
pub struct MetadataCache {
    rubrics: Arc<dyn RubricRepository>,
    attributes: Arc<dyn AttributeRepository>,
    products: Arc<dyn ProductSummaryRepository>,
    ttl: Duration,
    entries: RwLock<HashMap<String, MetaCacheEntry>>,
}

impl MetadataCache {
    pub fn new(
        rubrics: Arc<dyn RubricRepository>,
        attributes: Arc<dyn AttributeRepository>,
        products: Arc<dyn ProductSummaryRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            rubrics,
            attributes,
            products,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, rubric_slug: &str) -> Result<Option<Arc<RubricMeta>>, anyhow::Error> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(rubric_slug) {
                if entry.cached_at.elapsed() < self.ttl {
                    return Ok(Some(entry.meta.clone()));
                }
            }
        }
        let Some(meta) = self.load(rubric_slug).await? else {
            self.entries.write().await.remove(rubric_slug);
            return Ok(None);
        };
        let meta = Arc::new(meta);
        self.entries.write().await.insert(
            rubric_slug.to_string(),
            MetaCacheEntry {
                meta: meta.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(Some(meta))
    }

    pub async fn invalidate(&self, rubric_slug: Option<&str>) {
        let mut entries = self.entries.write().await;
        match rubric_slug {
            Some(slug) => {
                entries.remove(slug);
            }
            None => entries.clear(),
        }
        log::info!(
            "Catalogue metadata invalidated: {}",
            rubric_slug.unwrap_or("all rubrics")
        );
    }

    async fn load(&self, rubric_slug: &str) -> Result<Option<RubricMeta>, anyhow::Error> {
        let Some(rubric) = self
            .rubrics
            .get_by_slug(rubric_slug)
            .await
            .context("Unable to get rubric")?
        else {
            return Ok(None);
        };
        let attributes = self
            .attributes
            .select(&InGroups(rubric.attribute_groups.clone()))
            .await
            .context("Unable to select rubric attributes")?;
        let attributes = order_attributes(&rubric, attributes);
        let mut res = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let tree = if attribute.variant.has_options() {
                let options = self
                    .attributes
                    .select(&ByAttribute(attribute.id))
                    .await
                    .context("Unable to select attribute options")?;
                OptionTree::build(options)
            } else {
                OptionTree::default()
            };
            res.push(CatalogueAttribute { attribute, tree });
        }
        let meta = RubricMeta {
            attributes: AttributeSet::new(res),
            rubric,
        };
        self.scan_integrity(&meta).await;
        Ok(Some(meta))
    }

    /// Logs recorded filter slugs that no longer resolve to an option.
    async fn scan_integrity(&self, meta: &RubricMeta) {
        let Some(recorded) = self
            .products
            .recorded_option_slugs(meta.rubric.id)
            .await
            .log_error("Unable to scan recorded filter slugs")
        else {
            return;
        };
        let stale = recorded
            .iter()
            .filter(|(attribute, option)| {
                meta.attributes
                    .get(attribute)
                    .map_or(true, |a| a.tree.find_by_slug(option).is_none())
            })
            .collect::<Vec<_>>();
        if !stale.is_empty() {
            log::warn!(
                "Rubric {} has {} recorded filter slugs without an option: {:?}",
                meta.rubric.slug,
                stale.len(),
                stale
            );
        }
    }
}

/// Groups in rubric order, attributes by priority inside a group.
fn order_attributes(rubric: &Rubric, mut attributes: Vec<Attribute>) -> Vec<Attribute> {
    let group_position = rubric
        .attribute_groups
        .iter()
        .enumerate()
        .map(|(i, g)| (*g, i))
        .collect::<HashMap<_, _>>();
    attributes.sort_by_key(|a| {
        (
            group_position.get(&a.group_id).copied().unwrap_or(usize::MAX),
            Reverse(a.priority),
            a.slug.clone(),
        )
    });
    attributes
}
