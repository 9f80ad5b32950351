//! Facet counts for the filter panel.
//!
//! An option's count answers "how many products if this option were also
//! selected": every attribute is counted against the applied query with its
//! own conjuncts removed. All parts of a request are collected into one
//! [`FacetPlan`] that a [`FacetSource`] runs as a single statement.

use crate::filter::FilterSet;
use crate::metadata::{AttributeSet, CatalogueAttribute};
use crate::price::PriceScope;
use crate::query::{numeric_field, Expr, Field, QueryFragment};
use crate::slug::NumericRange;
use async_trait::async_trait;
use catalogue_types::attribute::AttributeVariant;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FacetPartKind {
    /// Every option of the attribute, counted over its whole subtree
    Options,
    Bucket { key: String, condition: Expr },
    Bounds { field: Field },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacetPart {
    pub attribute: String,
    /// Index into [`FacetPlan::bases`]
    pub base: usize,
    pub kind: FacetPartKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetPlan {
    pub bases: Vec<QueryFragment>,
    pub parts: Vec<FacetPart>,
}

impl FacetPlan {
    fn base_index(&mut self, base: QueryFragment) -> usize {
        match self.bases.iter().position(|b| *b == base) {
            Some(i) => i,
            None => {
                self.bases.push(base);
                self.bases.len() - 1
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FacetRow {
    Count {
        attribute: String,
        value: String,
        count: u64,
    },
    Bounds {
        attribute: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

#[async_trait]
pub trait FacetSource: Send + Sync {
    async fn facet_rows(
        &self,
        plan: &FacetPlan,
        prices: &PriceScope,
    ) -> Result<Vec<FacetRow>, anyhow::Error>;
}

pub fn plan(attributes: &AttributeSet, query: &QueryFragment) -> FacetPlan {
    let mut plan = FacetPlan::default();
    for attribute in attributes.filterable() {
        let slug = attribute.slug().to_string();
        let base = plan.base_index(query.without_attribute(&slug));
        match attribute.attribute.variant {
            AttributeVariant::Select | AttributeVariant::MultipleSelect => {
                if !attribute.tree.is_empty() {
                    plan.parts.push(FacetPart {
                        attribute: slug,
                        base,
                        kind: FacetPartKind::Options,
                    });
                }
            }
            AttributeVariant::Number => {
                let field = numeric_field(attribute);
                for range in bucket_ranges(attribute) {
                    plan.parts.push(FacetPart {
                        attribute: slug.clone(),
                        base,
                        kind: FacetPartKind::Bucket {
                            key: range.to_string(),
                            condition: Expr::range(field.clone(), &range),
                        },
                    });
                }
                plan.parts.push(FacetPart {
                    attribute: slug,
                    base,
                    kind: FacetPartKind::Bounds { field },
                });
            }
            AttributeVariant::Text => (),
        }
    }
    plan
}

fn bucket_ranges(attribute: &CatalogueAttribute) -> Vec<NumericRange> {
    attribute
        .attribute
        .buckets
        .iter()
        .filter_map(|b| {
            let range = NumericRange::new(b.min.normalize(), b.max.normalize());
            if range.is_none() {
                log::warn!(
                    "Bucket {}_{} of {} is inverted, skipping it",
                    b.min,
                    b.max,
                    attribute.slug()
                );
            }
            range
        })
        .collect()
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FacetOption {
    pub slug: String,
    pub name: String,
    pub count: u64,
    pub disabled: bool,
    pub selected: bool,
    pub depth: usize,
    /// Canonical path with this option toggled
    pub href: String,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FacetBounds {
    pub min: Decimal,
    pub max: Decimal,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Facet {
    pub attribute_slug: String,
    pub name: String,
    pub variant: AttributeVariant,
    pub metric: Option<String>,
    pub options: Vec<FacetOption>,
    pub bounds: Option<FacetBounds>,
}

/// Request values facets are rendered with.
pub struct FacetContext<'a> {
    pub rubric_slug: &'a str,
    pub locale: &'a str,
    pub fallback_locale: &'a str,
    pub prices: &'a PriceScope,
}

pub fn assemble(
    attributes: &AttributeSet,
    filters: &FilterSet,
    rows: Vec<FacetRow>,
    ctx: &FacetContext,
) -> Vec<Facet> {
    let mut counts: HashMap<(String, String), u64> = HashMap::new();
    let mut bounds: HashMap<String, (Option<f64>, Option<f64>)> = HashMap::new();
    for row in rows {
        match row {
            FacetRow::Count {
                attribute,
                value,
                count,
            } => {
                *counts.entry((attribute, value)).or_default() += count;
            }
            FacetRow::Bounds {
                attribute,
                min,
                max,
            } => {
                bounds.insert(attribute, (min, max));
            }
        }
    }
    let count_of = |attribute: &str, value: &str| {
        counts
            .get(&(attribute.to_string(), value.to_string()))
            .copied()
            .unwrap_or_default()
    };
    let option = |attribute: &str, slug: String, name: &str, depth: usize| {
        let count = count_of(attribute, &slug);
        FacetOption {
            href: filters.toggled(attribute, &slug).to_path(ctx.rubric_slug),
            selected: filters.is_selected(attribute, &slug),
            name: name.to_string(),
            disabled: count == 0,
            count,
            depth,
            slug,
        }
    };

    attributes
        .filterable()
        .map(|attribute| {
            let slug = attribute.slug();
            let (options, facet_bounds) = match attribute.attribute.variant {
                AttributeVariant::Number => {
                    let options = attribute
                        .attribute
                        .buckets
                        .iter()
                        .filter_map(|b| {
                            let range = NumericRange::new(b.min.normalize(), b.max.normalize())?;
                            Some(option(
                                slug,
                                range.to_string(),
                                b.name.get(ctx.locale, ctx.fallback_locale),
                                0,
                            ))
                        })
                        .collect();
                    let facet_bounds = bounds
                        .get(slug)
                        .and_then(|(min, max)| decimal_bounds(*min, *max))
                        .map(|b| {
                            if attribute.attribute.is_price() {
                                FacetBounds {
                                    min: ctx.prices.from_base(b.min),
                                    max: ctx.prices.from_base(b.max),
                                }
                            } else {
                                b
                            }
                        });
                    (options, facet_bounds)
                }
                _ => (
                    attribute
                        .tree
                        .preorder()
                        .into_iter()
                        .map(|(o, depth)| {
                            option(
                                slug,
                                o.slug.clone(),
                                o.name.get(ctx.locale, ctx.fallback_locale),
                                depth,
                            )
                        })
                        .collect(),
                    None,
                ),
            };
            Facet {
                attribute_slug: slug.to_string(),
                name: attribute
                    .attribute
                    .name
                    .get(ctx.locale, ctx.fallback_locale)
                    .to_string(),
                variant: attribute.attribute.variant,
                metric: attribute.attribute.metric.clone(),
                options,
                bounds: facet_bounds,
            }
        })
        .collect()
}

fn decimal_bounds(min: Option<f64>, max: Option<f64>) -> Option<FacetBounds> {
    Some(FacetBounds {
        min: Decimal::from_f64(min?)?.normalize(),
        max: Decimal::from_f64(max?)?.normalize(),
    })
}

pub struct FacetAggregator {
    source: Arc<dyn FacetSource>,
}

impl FacetAggregator {
    pub fn new(source: Arc<dyn FacetSource>) -> Self {
        Self { source }
    }

    /// `query` is the fully applied query, scope included.
    pub async fn compute(
        &self,
        attributes: &AttributeSet,
        filters: &FilterSet,
        query: &QueryFragment,
        ctx: &FacetContext<'_>,
    ) -> Result<Vec<Facet>, anyhow::Error> {
        let plan = plan(attributes, query);
        let rows = if plan.is_empty() {
            vec![]
        } else {
            self.source.facet_rows(&plan, ctx.prices).await?
        };
        log::debug!(
            "Facets of {}: {} parts over {} base queries, {} rows",
            ctx.rubric_slug,
            plan.parts.len(),
            plan.bases.len(),
            rows.len()
        );
        Ok(assemble(attributes, filters, rows, ctx))
    }
}
