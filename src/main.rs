use actix::prelude::*;
use actix_web::middleware::{DefaultHeaders, NormalizePath, TrailingSlash};
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as AnyhowContext;
use catalogue_facets::{
    attribute::SqliteAttributeRepository,
    composer::CatalogueComposer,
    config::CatalogueConfig,
    control,
    facet::FacetAggregator,
    metadata::MetadataCache,
    product_summary::SqliteProductSummaryRepository,
    rubric::SqliteRubricRepository,
    shop_product::SqliteShopProductRepository,
};
use catalogue_types::tenant::{ActiveRubricGate, DefaultTenantResolver};
use currency_service::CurrencyService;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }
    let config = CatalogueConfig::from_env().context("Unable to read configuration")?;
    log::info!("Starting catalogue with {config:?}");

    if let Some(dir) = std::path::Path::new(&config.db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).context("Unable to create storage directory")?;
        }
    }
    let conn = Connection::open(&config.db_path).await?;
    let rubrics = Arc::new(SqliteRubricRepository::init(conn.clone()).await?);
    let attributes = Arc::new(SqliteAttributeRepository::init(conn.clone()).await?);
    let products = Arc::new(SqliteProductSummaryRepository::init(conn.clone()).await?);
    let shop_products = Arc::new(SqliteShopProductRepository::init(conn).await?);

    let currency_service = CurrencyService::new(config.base_currency.clone()).start();

    let metadata = Arc::new(MetadataCache::new(
        rubrics,
        attributes,
        products.clone(),
        config.metadata_ttl,
    ));
    let composer = Arc::new(CatalogueComposer::new(
        metadata,
        products.clone(),
        FacetAggregator::new(products),
        shop_products,
        Arc::new(currency_service),
        Arc::new(DefaultTenantResolver::new(config.default_tenant())),
        Arc::new(ActiveRubricGate),
        config.composer_settings(),
    ));

    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async {
        let token = t;
        match signal::ctrl_c().await {
            Ok(_) => token.cancel(),
            Err(err) => log::error!("Unable to listen to shutdown: {err}"),
        }
    });

    let addr = (config.listen_addr.clone(), config.listen_port);
    HttpServer::new(move || {
        App::new()
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
                    .add(("Access-Control-Allow-Headers", "*")),
            )
            .wrap(actix_web::middleware::Compress::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .app_data(Data::new(composer.clone()))
            .app_data(Data::new(token.clone()))
            .service(control::catalogue::catalogue)
            .service(control::catalogue::invalidate)
    })
    .bind(&addr)
    .context(format!(
        "Failed to bind server to {}:{}. Is the port already in use?",
        addr.0, addr.1
    ))?
    .run()
    .await?;
    Ok(())
}
