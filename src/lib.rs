#![deny(clippy::unwrap_used)]

use std::str::FromStr;
use uuid::Uuid;

pub mod attribute;
pub mod composer;
pub mod config;
pub mod control;
pub mod facet;
pub mod filter;
pub mod metadata;
pub mod option_tree;
pub mod price;
pub mod product_summary;
pub mod query;
pub mod rubric;
pub mod shop_product;
pub mod slug;

/// Ids are written as blobs, older rows may carry them as text.
pub fn read_uuid(row: &rusqlite::Row, idx: usize) -> Result<Uuid, rusqlite::Error> {
    use rusqlite::types::{FromSqlError, Type, ValueRef};
    match row.get_ref(idx)? {
        ValueRef::Blob(bytes) => Uuid::from_slice(bytes).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(err))
        }),
        ValueRef::Text(text) => {
            let text = std::str::from_utf8(text).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
            })?;
            Uuid::from_str(text).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
            })
        }
        ValueRef::Null => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Null,
            Box::new(FromSqlError::Other("NULL uuid".into())),
        )),
        ValueRef::Integer(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "uuid".to_string(),
            Type::Integer,
        )),
        ValueRef::Real(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "uuid".to_string(),
            Type::Real,
        )),
    }
}

#[cfg(test)]
pub mod test_support {
    use crate::attribute::SqliteAttributeRepository;
    use crate::composer::{CatalogueComposer, ComposerSettings};
    use crate::facet::FacetAggregator;
    use crate::metadata::{AttributeSet, CatalogueAttribute, MetadataCache};
    use crate::option_tree::OptionTree;
    use crate::price::PriceScope;
    use crate::product_summary::SqliteProductSummaryRepository;
    use crate::rubric::SqliteRubricRepository;
    use crate::shop_product::SqliteShopProductRepository;
    use catalogue_types::attribute::{
        Attribute, AttributeGroup, AttributeOption, AttributeVariant, NumericBucket,
    };
    use catalogue_types::product::{AttributeValue, ProductSummary};
    use catalogue_types::rubric::Rubric;
    use catalogue_types::shop_product::ShopProduct;
    use catalogue_types::tenant::{ActiveRubricGate, DefaultTenantResolver, TenantScope};
    use catalogue_types::LocalizedName;
    use currency_service::RateTable;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;
    use time::OffsetDateTime;
    use tokio_rusqlite::Connection;
    use typesafe_repository::async_ops::Save;
    use uuid::Uuid;

    const GENERAL_GROUP: u128 = 10;
    const WINE_GROUP: u128 = 11;

    fn bucket(min: Decimal, max: Decimal, name: &str) -> NumericBucket {
        NumericBucket {
            min,
            max,
            name: LocalizedName::new("en", name),
        }
    }

    fn attribute(
        id: u128,
        group: u128,
        slug: &str,
        name: &str,
        variant: AttributeVariant,
        priority: i64,
    ) -> Attribute {
        Attribute {
            id: Uuid::from_u128(id),
            group_id: Uuid::from_u128(group),
            slug: slug.to_string(),
            name: LocalizedName::new("en", name),
            variant,
            metric: None,
            show_in_catalogue_filter: true,
            priority,
            buckets: vec![],
        }
    }

    fn option(
        attribute: u128,
        id: u128,
        parent: Option<u128>,
        slug: &str,
        name: &str,
        priority: i64,
    ) -> AttributeOption {
        AttributeOption {
            id: Uuid::from_u128(id),
            attribute_id: Uuid::from_u128(attribute),
            parent_id: parent.map(Uuid::from_u128),
            slug: slug.to_string(),
            name: LocalizedName::new("en", name),
            priority,
        }
    }

    /// Wine attributes in panel order, each with its flat option list.
    fn wine_schema() -> Vec<(Attribute, Vec<AttributeOption>)> {
        let price = Attribute {
            buckets: vec![
                bucket(dec!(0), dec!(999), "up to 999"),
                bucket(dec!(1000), dec!(2000), "1000 - 2000"),
                bucket(dec!(2001), dec!(5000), "2001 - 5000"),
            ],
            ..attribute(100, GENERAL_GROUP, "price", "Price", AttributeVariant::Number, 100)
        };
        let abv = Attribute {
            metric: Some("%".to_string()),
            buckets: vec![
                bucket(dec!(12), dec!(13.5), "light"),
                bucket(dec!(13.5), dec!(15), "strong"),
            ],
            ..attribute(101, GENERAL_GROUP, "abv", "Alcohol", AttributeVariant::Number, 50)
        };
        let grape = Attribute {
            name: LocalizedName::new("en", "Grape").with("uk", "Сорт"),
            ..attribute(102, WINE_GROUP, "grape", "Grape", AttributeVariant::MultipleSelect, 30)
        };
        let region = attribute(103, WINE_GROUP, "region", "Region", AttributeVariant::Select, 20);
        let tasting_note = attribute(
            104,
            WINE_GROUP,
            "tasting_note",
            "Tasting note",
            AttributeVariant::Text,
            10,
        );
        vec![
            (price, vec![]),
            (abv, vec![]),
            (
                grape,
                vec![
                    option(102, 201, None, "merlot", "Merlot", 10),
                    option(102, 202, None, "cabernet", "Cabernet", 5),
                ],
            ),
            (
                region,
                vec![
                    option(103, 301, None, "france", "France", 0),
                    option(103, 302, Some(301), "bordeaux", "Bordeaux", 0),
                    option(103, 303, Some(302), "medoc", "Medoc", 0),
                    option(103, 304, Some(303), "pauillac", "Pauillac", 0),
                    option(103, 305, Some(301), "burgundy", "Burgundy", 10),
                    option(103, 306, None, "spain", "Spain", 5),
                    option(103, 307, Some(306), "rioja", "Rioja", 0),
                ],
            ),
            (tasting_note, vec![]),
        ]
    }

    /// Same attributes [`Fixture::wine`] stores, without a database.
    pub fn wine_attributes() -> AttributeSet {
        AttributeSet::new(
            wine_schema()
                .into_iter()
                .map(|(attribute, options)| CatalogueAttribute {
                    attribute,
                    tree: OptionTree::build(options),
                })
                .collect(),
        )
    }

    pub fn product(
        slug: &str,
        rubric_id: Uuid,
        options: &[(&str, &[&str])],
        numbers: &[(&str, Decimal)],
    ) -> ProductSummary {
        let mut values = BTreeMap::new();
        for (attribute, slugs) in options {
            values.insert(
                attribute.to_string(),
                AttributeValue::Options(slugs.iter().map(|s| s.to_string()).collect()),
            );
        }
        for (attribute, n) in numbers {
            values.insert(attribute.to_string(), AttributeValue::Number(*n));
        }
        ProductSummary {
            id: Uuid::new_v4(),
            rubric_id,
            slug: slug.to_string(),
            name: LocalizedName::new("en", slug),
            active: true,
            brand: None,
            manufacturer: None,
            values,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    pub struct Fixture {
        pub rubrics: Arc<SqliteRubricRepository>,
        pub attributes: Arc<SqliteAttributeRepository>,
        pub products: Arc<SqliteProductSummaryRepository>,
        pub shop_products: Arc<SqliteShopProductRepository>,
        pub rubric_id: Uuid,
        product_ids: HashMap<String, Uuid>,
    }

    impl Fixture {
        pub async fn empty() -> Self {
            let conn = Connection::open_in_memory().await.unwrap();
            Self {
                rubrics: Arc::new(SqliteRubricRepository::init(conn.clone()).await.unwrap()),
                attributes: Arc::new(SqliteAttributeRepository::init(conn.clone()).await.unwrap()),
                products: Arc::new(
                    SqliteProductSummaryRepository::init(conn.clone()).await.unwrap(),
                ),
                shop_products: Arc::new(SqliteShopProductRepository::init(conn).await.unwrap()),
                rubric_id: Uuid::from_u128(1),
                product_ids: HashMap::new(),
            }
        }

        /// Four wines, one of them without offers, plus a hidden `spirits` rubric.
        pub async fn wine() -> Self {
            let mut fixture = Self::empty().await;
            for (id, name) in [(GENERAL_GROUP, "General"), (WINE_GROUP, "Wine")] {
                fixture
                    .attributes
                    .save(AttributeGroup {
                        id: Uuid::from_u128(id),
                        name: LocalizedName::new("en", name),
                    })
                    .await
                    .unwrap();
            }
            for (attribute, options) in wine_schema() {
                fixture.attributes.save(attribute).await.unwrap();
                for option in options {
                    fixture.attributes.save(option).await.unwrap();
                }
            }
            fixture
                .rubrics
                .save(Rubric {
                    id: fixture.rubric_id,
                    slug: "wine".to_string(),
                    name: LocalizedName::new("en", "Wine").with("uk", "Вино"),
                    active: true,
                    show_in_navigation: true,
                    show_in_filter: true,
                    priority: 10,
                    attribute_groups: vec![
                        Uuid::from_u128(GENERAL_GROUP),
                        Uuid::from_u128(WINE_GROUP),
                    ],
                })
                .await
                .unwrap();
            fixture
                .rubrics
                .save(Rubric {
                    id: Uuid::from_u128(2),
                    slug: "spirits".to_string(),
                    name: LocalizedName::new("en", "Spirits"),
                    active: true,
                    show_in_navigation: false,
                    show_in_filter: false,
                    priority: 0,
                    attribute_groups: vec![],
                })
                .await
                .unwrap();

            let wines: [(&str, &str, &str, Decimal, i64); 4] = [
                ("chateau-a", "merlot", "bordeaux", dec!(13.5), 1000),
                ("rioja-reserva", "merlot", "rioja", dec!(14), 2000),
                ("pauillac-grand", "cabernet", "pauillac", dec!(13), 3000),
                ("no-offer-merlot", "merlot", "bordeaux", dec!(12.5), 4000),
            ];
            for (slug, grape, region, abv, created_at) in wines {
                let mut p = product(
                    slug,
                    fixture.rubric_id,
                    &[("grape", &[grape]), ("region", &[region])],
                    &[("abv", abv)],
                );
                p.created_at = OffsetDateTime::from_unix_timestamp(created_at).unwrap();
                p.values.insert(
                    "tasting_note".to_string(),
                    AttributeValue::Text(LocalizedName::new("en", "dry")),
                );
                fixture.product_ids.insert(slug.to_string(), p.id);
                fixture.products.save(p).await.unwrap();
            }

            let offers: [(&str, &str, &str, i64, i64); 7] = [
                ("chateau-a", "winehouse", "kyiv", 1500, 5),
                ("chateau-a", "cellar", "kyiv", 1700, 2),
                ("chateau-a", "winehouse", "lviv", 1600, 1),
                ("pauillac-grand", "winehouse", "kyiv", 2500, 1),
                ("pauillac-grand", "cellar", "kyiv", 100, 0),
                ("rioja-reserva", "winehouse", "kyiv", 900, 4),
                ("rioja-reserva", "cellar", "kyiv", 0, 3),
            ];
            for (product, company, city, price, available) in offers {
                fixture
                    .shop_products
                    .save(ShopProduct {
                        id: Uuid::new_v4(),
                        product_id: fixture.product_id(product),
                        shop_slug: format!("{company}-{city}"),
                        company_slug: company.to_string(),
                        city_slug: city.to_string(),
                        price,
                        available,
                    })
                    .await
                    .unwrap();
            }
            fixture
        }

        pub fn product_id(&self, slug: &str) -> Uuid {
            self.product_ids[slug]
        }

        pub fn prices(&self, city: &str) -> PriceScope {
            PriceScope {
                city: city.to_string(),
                company: None,
                currency: "UAH".to_string(),
                rate: Decimal::ONE,
            }
        }

        pub fn metadata(&self) -> MetadataCache {
            MetadataCache::new(
                self.rubrics.clone(),
                self.attributes.clone(),
                self.products.clone(),
                Duration::from_secs(60),
            )
        }

        pub fn settings(&self) -> ComposerSettings {
            ComposerSettings {
                page_size: 2,
                timeout: Duration::from_secs(5),
                base_currency: "UAH".to_string(),
                fallback_locale: "en".to_string(),
                in_stock_only: true,
            }
        }

        pub fn composer(&self) -> CatalogueComposer {
            self.composer_with(self.settings(), FacetAggregator::new(self.products.clone()))
        }

        pub fn composer_with(
            &self,
            settings: ComposerSettings,
            facets: FacetAggregator,
        ) -> CatalogueComposer {
            CatalogueComposer::new(
                Arc::new(self.metadata()),
                self.products.clone(),
                facets,
                self.shop_products.clone(),
                Arc::new(
                    RateTable::new("UAH")
                        .with_rate("USD", dec!(40))
                        .with_rate("PLN", dec!(7)),
                ),
                Arc::new(DefaultTenantResolver::new(TenantScope {
                    city: "kyiv".to_string(),
                    company: None,
                    currency: "UAH".to_string(),
                    locale: "en".to_string(),
                })),
                Arc::new(ActiveRubricGate),
                settings,
            )
        }
    }
}
