use anyhow::Result;
use axum::Router;
use keebshop_orderservice::{app_state::AppState, bootstrap, config, db, sweep};
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_env();
    bootstrap::init_tracing();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(&config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let pool = db::create_pool(&config.database.url, config.database.max_connections).await?;
    let state = AppState::new(pool, config);

    let (routes, mut openapi) = keebshop_orderservice::app(state.clone());
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("KeebShop OrderService API")
        .version("1.0.0")
        .build();
    let swagger_ui = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi);

    let app = Router::new().merge(routes).merge(swagger_ui);

    tracing::info!("Starting order sweep every {:?}", state.config.sweep.interval);
    tokio::spawn(sweep::run(state.clone()));

    tracing::info!("Bootstrapping...");
    bootstrap::serve("OrderService", &state.config.server, app).await
}
