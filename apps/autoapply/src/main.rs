mod automation;
mod config;
mod cv;
mod db;
mod errors;
mod intake;
mod models;
mod pipeline;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::automation::classifier::KeywordClassifier;
use crate::automation::profile::FormProfile;
use crate::automation::screenshots::{ScreenshotStore, ScreenshotUploader};
use crate::automation::BrowserWorker;
use crate::config::{Config, S3Settings};
use crate::cv::CvResolver;
use crate::db::{connect_external, create_pool};
use crate::intake::QueueIntake;
use crate::pipeline::{
    ApplicationStore, Orchestrator, OrchestratorSettings, PgApplicationStore, PgJobMarker,
};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (aborts on missing or malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting autoapply v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL + migrations
    let pool = create_pool(&config.database_url).await?;
    let store: Arc<dyn ApplicationStore> = Arc::new(PgApplicationStore::new(pool.clone()));

    // S3 / MinIO, only when a CV source or screenshot upload needs it
    let s3 = match &config.s3 {
        Some(settings) => {
            let client = build_s3_client(settings).await;
            info!("S3 client initialized ({})", settings.endpoint);
            Some(client)
        }
        None => None,
    };

    let cv = CvResolver::from_config(&config.cv_source, s3.clone())?;
    info!("CV source: {}", cv.kind());

    let profile = FormProfile::load(config.form_profile_path.as_deref())?;
    let classifier = Arc::new(KeywordClassifier::new(profile.signals.clone()));

    let uploader = match (&s3, &config.s3) {
        (Some(client), Some(settings)) if config.screenshots.upload => {
            settings.bucket.clone().map(|bucket| ScreenshotUploader {
                client: client.clone(),
                bucket,
            })
        }
        _ => None,
    };
    let screenshots = ScreenshotStore::new(
        config.screenshots.path.clone(),
        config.screenshots.mode,
        uploader,
    );

    let worker = BrowserWorker::new(config.browser.clone(), profile, classifier, screenshots)
        .context("Invalid WEBDRIVER_URL")?;
    if config.browser.dry_run {
        warn!("DRY_RUN enabled: forms are filled but never submitted");
    }

    let mut orchestrator = Orchestrator::new(
        store.clone(),
        cv,
        Arc::new(worker),
        OrchestratorSettings {
            max_per_run: config.max_applications_per_run,
            delay: config.delay_between_applications,
            stale_grace: chrono::Duration::from_std(config.stale_claim_grace)
                .context("STALE_CLAIM_GRACE_SECS is out of range")?,
        },
    );
    if let Some(settings) = &config.job_marker {
        let jobs_pool = match &settings.database_url {
            Some(url) => connect_external(url).await?,
            None => pool.clone(),
        };
        orchestrator =
            orchestrator.with_job_marker(Arc::new(PgJobMarker::new(jobs_pool, &settings.table)?));
        info!("Successful applications are marked in '{}'", settings.table);
    }

    // Reclaim whatever a previous process left behind
    let (runs, applications) = orchestrator.recover().await?;
    if runs + applications > 0 {
        info!("Recovered {runs} abandoned run(s) and {applications} interrupted application(s)");
    }

    if let Some(redis_url) = &config.redis_url {
        let intake = QueueIntake::new(redis_url, config.intake_queue.clone(), store.clone())?;
        tokio::spawn(intake.run());
        info!("Queue intake enabled");
    }

    let state = AppState {
        store,
        orchestrator,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(settings: &S3Settings) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &settings.access_key_id,
        &settings.secret_access_key,
        None,
        None,
        "autoapply-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&settings.endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
