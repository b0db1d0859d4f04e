use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use order_service::api::{self, AppState};
use order_service::collaborators::{
    AbuseVerifier, GeoLocator, HttpComposer, IpApiLocator, MessageComposer, NoGeolocation, SkipAbuseCheck,
    TemplateOnly, TurnstileVerifier,
};
use order_service::config::Args;
use order_service::dispatcher::Dispatcher;
use order_service::intake::OrderIntake;
use order_service::integrations::{HandlerDeps, Registry};
use order_service::recovery::RecoveryScheduler;
use order_service::store::{PgStore, Store};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let http = reqwest::Client::builder()
        .user_agent(concat!("order-service/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let collaborator_timeout = args.collaborator_timeout();

    let verifier: Arc<dyn AbuseVerifier> = match &args.turnstile_secret {
        Some(secret) => Arc::new(TurnstileVerifier::new(
            http.clone(),
            secret.clone(),
            args.turnstile_verify_url.clone(),
            collaborator_timeout,
        )),
        None => {
            warn!("TURNSTILE_SECRET not set; order verification is disabled");
            Arc::new(SkipAbuseCheck)
        }
    };
    let geo: Arc<dyn GeoLocator> = match &args.geolocation_url {
        Some(url) => Arc::new(IpApiLocator::new(http.clone(), url.clone(), collaborator_timeout)),
        None => Arc::new(NoGeolocation),
    };
    let composer: Arc<dyn MessageComposer> = match &args.composer_url {
        Some(url) => Arc::new(HttpComposer::new(
            http.clone(),
            url.clone(),
            args.composer_api_key.clone(),
            args.dispatch_config().handler_timeout / 2,
        )),
        None => Arc::new(TemplateOnly),
    };

    let registry = Registry::builtin();
    let deps = HandlerDeps {
        http,
        composer,
        endpoints: args.endpoints(),
    };
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        registry.clone(),
        deps,
        args.dispatch_config(),
    ));
    let intake = Arc::new(OrderIntake::new(store.clone(), verifier, geo, dispatcher.clone()));
    let recovery = Arc::new(RecoveryScheduler::new(
        store.clone(),
        dispatcher.clone(),
        args.recovery_config(),
    ));

    if let Some(every) = args.sweep_interval() {
        let recovery = recovery.clone();
        info!("Running abandoned checkout sweep every {:?}", every);
        tokio::spawn(async move {
            recovery.run(every).await;
        });
    }

    // Start the web server
    let app_state = AppState {
        intake,
        recovery,
        store,
        registry,
        admin_secret: Arc::from(args.scheduler_secret.as_str()),
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Order service web server started on port {}", args.port);
    info!("Accepting orders at http://0.0.0.0:{}/stores/{{slug}}/orders", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
