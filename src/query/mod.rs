//! Query fragment IR.
//!
//! The builder only produces [`Expr`] trees; turning them into SQL is the job of
//! [`sql`]. A [`QueryFragment`] is a normalized conjunction, so combining
//! fragments is plain set union and a facet base query is the same fragment
//! with one attribute's conjuncts taken out.

use crate::filter::{FilterSet, Selection};
use crate::metadata::{AttributeSet, CatalogueAttribute};
use crate::slug::NumericRange;
use catalogue_types::attribute::AttributeVariant;
use catalogue_types::attribute::PRICE_ATTRIBUTE_SLUG;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use uuid::Uuid;

pub mod sql;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Rubric,
    Active,
    /// Options of the attribute, a product matches an option when it records
    /// the option or any of its descendants
    OptionSlug(String),
    /// Stored numeric value of the attribute
    Number(String),
    /// Minimal offer price in the request's price scope
    Price,
    /// An offer exists in the request's price scope
    Offer,
}

impl Field {
    /// Attribute slug a conjunct over this field belongs to.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Field::OptionSlug(a) | Field::Number(a) => Some(a),
            Field::Price => Some(PRICE_ATTRIBUTE_SLUG),
            Field::Rubric | Field::Active | Field::Offer => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Uuid(Uuid),
    Bool(bool),
    Text(String),
    Number(Decimal),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Equals(Field, Value),
    In(Field, BTreeSet<Value>),
    /// Inclusive, open on a missing side
    Range {
        field: Field,
        min: Option<Decimal>,
        max: Option<Decimal>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn range(field: Field, range: &NumericRange) -> Self {
        Expr::Range {
            field,
            min: Some(range.lower()),
            max: Some(range.upper()),
        }
    }

    /// OR of the given expressions, collapsed when there is only one.
    pub fn any(mut exprs: Vec<Expr>) -> Self {
        exprs.sort();
        exprs.dedup();
        if exprs.len() == 1 {
            if let Some(expr) = exprs.pop() {
                return expr;
            }
        }
        Expr::Or(exprs)
    }

    pub fn mentions(&self, attribute: &str) -> bool {
        match self {
            Expr::Equals(field, _) | Expr::In(field, _) | Expr::Range { field, .. } => {
                field.attribute() == Some(attribute)
            }
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().any(|e| e.mentions(attribute)),
        }
    }
}

/// Normalized conjunction: flattened, sorted and free of duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueryFragment {
    conjuncts: Vec<Expr>,
}

impl QueryFragment {
    pub fn new<I: IntoIterator<Item = Expr>>(exprs: I) -> Self {
        let mut conjuncts = vec![];
        let mut stack: Vec<Expr> = exprs.into_iter().collect();
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::And(inner) => stack.extend(inner),
                other => conjuncts.push(other),
            }
        }
        conjuncts.sort();
        conjuncts.dedup();
        Self { conjuncts }
    }

    pub fn and(self, other: QueryFragment) -> Self {
        Self::new(self.conjuncts.into_iter().chain(other.conjuncts))
    }

    pub fn with(self, expr: Expr) -> Self {
        Self::new(self.conjuncts.into_iter().chain(std::iter::once(expr)))
    }

    /// The same fragment without any conjunct that constrains `attribute`.
    pub fn without_attribute(&self, attribute: &str) -> Self {
        Self {
            conjuncts: self
                .conjuncts
                .iter()
                .filter(|c| !c.mentions(attribute))
                .cloned()
                .collect(),
        }
    }

    pub fn conjuncts(&self) -> &[Expr] {
        &self.conjuncts
    }

    pub fn is_empty(&self) -> bool {
        self.conjuncts.is_empty()
    }

    pub fn into_expr(self) -> Expr {
        Expr::And(self.conjuncts)
    }
}

/// Rubric and offer constraints every listing query carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryScope {
    pub rubric_id: Uuid,
    /// Price-bearing queries only list products with an offer in scope
    pub require_offer: bool,
}

impl QueryScope {
    pub fn fragment(&self) -> QueryFragment {
        let mut exprs = vec![
            Expr::Equals(Field::Rubric, Value::Uuid(self.rubric_id)),
            Expr::Equals(Field::Active, Value::Bool(true)),
        ];
        if self.require_offer {
            exprs.push(Expr::Equals(Field::Offer, Value::Bool(true)));
        }
        QueryFragment::new(exprs)
    }
}

pub fn build(filters: &FilterSet, scope: &QueryScope, attributes: &AttributeSet) -> QueryFragment {
    scope.fragment().and(build_filters(filters, attributes))
}

/// Filter conjuncts only, one per selected attribute.
pub fn build_filters(filters: &FilterSet, attributes: &AttributeSet) -> QueryFragment {
    QueryFragment::new(
        filters
            .selections()
            .iter()
            .filter_map(|(slug, selection)| match attributes.get(slug) {
                Some(attribute) => selection_expr(attribute, selection),
                None => {
                    log::debug!("Skipping selection of unknown attribute {slug}");
                    None
                }
            }),
    )
}

pub fn selection_expr(attribute: &CatalogueAttribute, selection: &Selection) -> Option<Expr> {
    let slug = attribute.slug();
    match (attribute.attribute.variant, selection) {
        (AttributeVariant::Select | AttributeVariant::MultipleSelect, Selection::Options(selected)) => {
            let known = selected
                .iter()
                .filter(|s| attribute.tree.find_by_slug(s).is_some())
                .map(|s| Value::Text(s.clone()))
                .collect::<BTreeSet<_>>();
            (!known.is_empty()).then(|| Expr::In(Field::OptionSlug(slug.to_string()), known))
        }
        (AttributeVariant::Number, Selection::Ranges(ranges)) if !ranges.is_empty() => {
            let field = numeric_field(attribute);
            Some(Expr::any(
                ranges.iter().map(|r| Expr::range(field.clone(), r)).collect(),
            ))
        }
        _ => {
            log::debug!("Selection does not fit attribute {slug}");
            None
        }
    }
}

pub fn numeric_field(attribute: &CatalogueAttribute) -> Field {
    if attribute.attribute.is_price() {
        Field::Price
    } else {
        Field::Number(attribute.slug().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use crate::test_support::wine_attributes;

    fn scope() -> QueryScope {
        QueryScope {
            rubric_id: Uuid::from_u128(1),
            require_offer: true,
        }
    }

    fn texts(slugs: &[&str]) -> BTreeSet<Value> {
        slugs.iter().map(|s| Value::Text(s.to_string())).collect()
    }

    #[test]
    fn option_selection_keeps_chosen_known_options() {
        let attributes = wine_attributes();
        let mut f = parse(["region-bordeaux"], &attributes).filters;
        f.select_option("region", "atlantis");
        let q = build_filters(&f, &attributes);
        assert_eq!(
            q.conjuncts(),
            &[Expr::In(
                Field::OptionSlug("region".to_string()),
                texts(&["bordeaux"])
            )]
        );

        let mut unknown = FilterSet::default();
        unknown.select_option("region", "atlantis");
        assert!(build_filters(&unknown, &attributes).conjuncts().is_empty());
    }

    #[test]
    fn price_ranges_are_ored() {
        let attributes = wine_attributes();
        let f = parse(["price-3000_4000", "price-1000_2000"], &attributes).filters;
        let q = build_filters(&f, &attributes);
        match q.conjuncts() {
            [Expr::Or(ranges)] => {
                assert_eq!(ranges.len(), 2);
                assert!(ranges
                    .iter()
                    .all(|r| matches!(r, Expr::Range { field: Field::Price, .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn build_is_associative_over_disjoint_attributes() {
        let attributes = wine_attributes();
        let f1 = parse(["grape-merlot", "abv-12_14"], &attributes).filters;
        let f2 = parse(["region-france", "price-1000_2000"], &attributes).filters;
        let union = parse(
            ["grape-merlot", "abv-12_14", "region-france", "price-1000_2000"],
            &attributes,
        )
        .filters;
        let combined = build(&f1, &scope(), &attributes).and(build(&f2, &scope(), &attributes));
        assert_eq!(build(&union, &scope(), &attributes), combined);
        let flipped = build(&f2, &scope(), &attributes).and(build(&f1, &scope(), &attributes));
        assert_eq!(combined, flipped);
    }

    #[test]
    fn without_attribute_removes_only_that_subtree() {
        let attributes = wine_attributes();
        let f = parse(["grape-merlot", "region-bordeaux", "price-1000_2000"], &attributes).filters;
        let full = build(&f, &scope(), &attributes);
        let base = full.without_attribute("region");
        assert_eq!(base, build(&f.without("region"), &scope(), &attributes));
        assert!(!base.conjuncts().iter().any(|c| c.mentions("region")));
        // offer requirement is not a price filter
        let no_price = full.without_attribute("price");
        assert!(no_price
            .conjuncts()
            .contains(&Expr::Equals(Field::Offer, Value::Bool(true))));
        assert_eq!(no_price.conjuncts().len(), full.conjuncts().len() - 1);
    }

    #[test]
    fn nested_and_is_flattened() {
        let a = Expr::Equals(Field::Active, Value::Bool(true));
        let r = Expr::Equals(Field::Rubric, Value::Uuid(Uuid::nil()));
        let q = QueryFragment::new([Expr::And(vec![a.clone(), Expr::And(vec![r.clone()])]), a.clone()]);
        let mut expected = vec![a, r];
        expected.sort();
        assert_eq!(q.conjuncts(), expected.as_slice());
    }
}
