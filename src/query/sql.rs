//! Lowering of [`Expr`] trees into parameterised SQLite.
//!
//! Product summaries are always aliased `ps`. Placeholders are positional, so
//! text and parameters must be appended in the same order.

use super::{Expr, Field, QueryFragment, Value};
use crate::facet::{FacetPartKind, FacetPlan};
use crate::price::PriceScope;
use rusqlite::types::Value as SqlValue;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Default, Clone)]
pub struct SqlBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn bind<V: Into<SqlValue>>(&mut self, value: V) -> &mut Self {
        self.sql.push('?');
        self.params.push(value.into());
        self
    }

    pub fn bind_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn finish(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

pub fn decimal(value: Decimal) -> SqlValue {
    SqlValue::Real(value.to_f64().unwrap_or_default())
}

pub fn uuid(value: uuid::Uuid) -> SqlValue {
    SqlValue::Blob(value.as_bytes().to_vec())
}

fn value(value: &Value) -> SqlValue {
    match value {
        Value::Uuid(id) => uuid(*id),
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Text(t) => SqlValue::Text(t.clone()),
        Value::Number(n) => decimal(*n),
    }
}

/// Minimal available, positive offer price of `ps` in base currency, NULL without offers.
pub fn push_min_price(b: &mut SqlBuilder, prices: &PriceScope) {
    b.push("(SELECT MIN(o.price) FROM shop_product o WHERE o.product_id = ps.id AND o.city_slug = ")
        .bind(prices.city.clone());
    if let Some(company) = &prices.company {
        b.push(" AND o.company_slug = ").bind(company.clone());
    }
    b.push(" AND o.available > 0 AND o.price > 0)");
}

/// Minimal price as shown to the client: request currency, rounded to cents
/// the same way `from_base` rounds.
pub fn push_shown_price(b: &mut SqlBuilder, prices: &PriceScope) {
    b.push("ROUND(");
    push_min_price(b, prices);
    b.push(" / ").bind(decimal(prices.rate)).push(", 2)");
}

/// Writes the value of `field` for `ps` followed by `predicate`.
fn lower_on<F>(b: &mut SqlBuilder, field: &Field, prices: &PriceScope, predicate: F)
where
    F: FnOnce(&mut SqlBuilder),
{
    match field {
        Field::Rubric => {
            b.push("ps.rubric_id");
            predicate(b);
        }
        Field::Active => {
            b.push("ps.active");
            predicate(b);
        }
        Field::OptionSlug(attribute) => {
            // Selected options match their whole subtree through the closure.
            b.push("EXISTS (SELECT 1 FROM product_filter_slug f JOIN option_closure c \
                    ON c.attribute_slug = f.attribute_slug AND c.member_slug = f.option_slug \
                    WHERE f.product_id = ps.id AND f.attribute_slug = ")
                .bind(attribute.clone())
                .push(" AND c.option_slug");
            predicate(b);
            b.push(")");
        }
        Field::Number(attribute) => {
            b.push("EXISTS (SELECT 1 FROM product_number n WHERE n.product_id = ps.id AND n.attribute_slug = ")
                .bind(attribute.clone())
                .push(" AND n.value");
            predicate(b);
            b.push(")");
        }
        Field::Price => {
            push_shown_price(b, prices);
            predicate(b);
        }
        Field::Offer => {
            b.push("(");
            push_min_price(b, prices);
            b.push(" IS NOT NULL)");
            predicate(b);
        }
    }
}

pub fn lower(b: &mut SqlBuilder, expr: &Expr, prices: &PriceScope) {
    match expr {
        Expr::Equals(field, v) => {
            let v = value(v);
            lower_on(b, field, prices, |b| {
                b.push(" = ").bind(v);
            });
        }
        Expr::In(_, values) if values.is_empty() => {
            b.push("0");
        }
        Expr::In(field, values) => {
            let values = values.iter().map(value).collect::<Vec<_>>();
            lower_on(b, field, prices, |b| {
                b.push(" IN (").bind_list(values).push(")");
            });
        }
        Expr::Range { field, min, max } => {
            let min = min.map(decimal);
            let max = max.map(decimal);
            lower_on(b, field, prices, |b| match (min, max) {
                (None, None) => {
                    b.push(" IS NOT NULL");
                }
                (Some(min), None) => {
                    b.push(" >= ").bind(min);
                }
                (None, Some(max)) => {
                    b.push(" <= ").bind(max);
                }
                (Some(min), Some(max)) => {
                    b.push(" BETWEEN ").bind(min).push(" AND ").bind(max);
                }
            });
        }
        Expr::And(exprs) => lower_junction(b, exprs, " AND ", "1", prices),
        Expr::Or(exprs) => lower_junction(b, exprs, " OR ", "0", prices),
    }
}

fn lower_junction(b: &mut SqlBuilder, exprs: &[Expr], op: &str, empty: &str, prices: &PriceScope) {
    if exprs.is_empty() {
        b.push(empty);
        return;
    }
    b.push("(");
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            b.push(op);
        }
        lower(b, expr, prices);
    }
    b.push(")");
}

pub fn lower_fragment(b: &mut SqlBuilder, fragment: &QueryFragment, prices: &PriceScope) {
    lower_junction(b, fragment.conjuncts(), " AND ", "1", prices);
}

/// `SELECT ps.id FROM product_summary ps WHERE <fragment>`
pub fn push_product_ids(b: &mut SqlBuilder, fragment: &QueryFragment, prices: &PriceScope) {
    b.push("SELECT ps.id FROM product_summary ps WHERE ");
    lower_fragment(b, fragment, prices);
}

/// One `UNION ALL` statement for the whole plan. Rows are
/// `(kind, attribute, value, count, min, max)`, `kind` is `count` or `bounds`;
/// options without matching products produce no row.
pub fn lower_facet_plan(plan: &FacetPlan, prices: &PriceScope) -> SqlBuilder {
    let mut b = SqlBuilder::new();
    for (i, base) in plan.bases.iter().enumerate() {
        b.push(if i == 0 { "WITH " } else { ", " });
        b.push(&format!("b{i} AS ("));
        push_product_ids(&mut b, base, prices);
        b.push(")");
    }
    for (i, part) in plan.parts.iter().enumerate() {
        if i == 0 {
            b.push(" ");
        } else {
            b.push(" UNION ALL ");
        }
        let base = format!("(SELECT id FROM b{})", part.base);
        match &part.kind {
            FacetPartKind::Options => {
                b.push("SELECT 'count', ")
                    .bind(part.attribute.clone())
                    .push(", c.option_slug, COUNT(DISTINCT f.product_id), NULL, NULL FROM option_closure c \
                           JOIN product_filter_slug f ON f.attribute_slug = c.attribute_slug AND f.option_slug = c.member_slug \
                           WHERE c.attribute_slug = ")
                    .bind(part.attribute.clone())
                    .push(" AND f.product_id IN ")
                    .push(&base)
                    .push(" GROUP BY c.option_slug");
            }
            FacetPartKind::Bucket { key, condition } => {
                b.push("SELECT 'count', ")
                    .bind(part.attribute.clone())
                    .push(", ")
                    .bind(key.clone())
                    .push(", COUNT(*), NULL, NULL FROM product_summary ps WHERE ps.id IN ")
                    .push(&base)
                    .push(" AND ");
                lower(&mut b, condition, prices);
            }
            FacetPartKind::Bounds {
                field: Field::Number(attribute),
            } => {
                b.push("SELECT 'bounds', ")
                    .bind(part.attribute.clone())
                    .push(", NULL, NULL, MIN(n.value), MAX(n.value) FROM product_number n WHERE n.attribute_slug = ")
                    .bind(attribute.clone())
                    .push(" AND n.product_id IN ")
                    .push(&base);
            }
            FacetPartKind::Bounds { .. } => {
                b.push("SELECT 'bounds', ")
                    .bind(part.attribute.clone())
                    .push(", NULL, NULL, MIN(p.price), MAX(p.price) FROM (SELECT ");
                push_min_price(&mut b, prices);
                b.push(" AS price FROM product_summary ps WHERE ps.id IN ")
                    .push(&base)
                    .push(") p");
            }
        }
    }
    b
}
