use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use scrapehub_core::config::ScrapeHubConfig;
use scrapehub_core::scraper::browser::BrowserRenderer;
use scrapehub_core::storage::memory::{MemoryHistoryStore, MemorySourceStore};
use scrapehub_core::storage::postgres::PgSourceStore;
use scrapehub_core::storage::redis::RedisHistoryStore;
use scrapehub_core::storage::{HistoryStore, SourceStore};
use scrapehub_core::{
    History, HistoryAccumulator, NewSource, Row, RowExtractor, ScrapeError, ScrapeService,
    Source, SourceId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrapehub_api=debug,scrapehub_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ScrapeHubConfig::from_env()?;

    let renderer = BrowserRenderer::new(&config.browser).await?;

    let histories: Arc<dyn HistoryStore> = match &config.redis_url {
        Some(url) => {
            let mut cfg = deadpool_redis::Config::default();
            cfg.url = Some(url.clone());
            let pool = cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
            Arc::new(RedisHistoryStore::new(pool))
        }
        None => {
            tracing::warn!("REDIS_URL not set, histories are kept in memory");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let sources: Arc<dyn SourceStore> = match &config.database_url {
        Some(url) => {
            let pg_pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;

            sqlx::migrate!("../../crates/scrapehub-core/migrations")
                .run(&pg_pool)
                .await?;

            Arc::new(PgSourceStore::new(pg_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sources are kept in memory");
            Arc::new(MemorySourceStore::new())
        }
    };

    let service = ScrapeService::new(
        sources,
        RowExtractor::new(Arc::new(renderer), config.extract.clone()),
        HistoryAccumulator::new(histories, config.max_conflict_retries),
    );

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState {
        service,
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .nest(
            "/v1",
            Router::new()
                .route("/sources", post(create_source))
                .route("/sources/:id", get(get_source).put(update_source))
                .route("/sources/:id/scrape", post(scrape_source))
                .route("/sources/:id/history", get(get_history))
                .route("/sources/:id/export", get(export_history)),
        )
        .with_state(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down, cancelling in-flight scrapes");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

struct AppState {
    service: ScrapeService,
    shutdown: CancellationToken,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    }))
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        let status = match &err {
            ScrapeError::SourceNotFound(_) | ScrapeError::HistoryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ScrapeError::InvalidSelectors(_) => StatusCode::BAD_REQUEST,
            ScrapeError::Navigation { .. }
            | ScrapeError::ReadinessTimeout { .. }
            | ScrapeError::FieldExtraction { .. } => StatusCode::BAD_GATEWAY,
            ScrapeError::ConcurrentUpdateConflict { .. } => StatusCode::CONFLICT,
            ScrapeError::Cancelled | ScrapeError::TimedOut { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ScrapeError::Renderer(_)
            | ScrapeError::StorageRead(_)
            | ScrapeError::StorageWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{}", err);
        }
        Self::new(status, err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn create_source(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewSource>,
) -> Result<(StatusCode, Json<ApiResponse<Source>>), ApiError> {
    new.validate()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;
    let source = state
        .service
        .sources()
        .create_source(new)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    tracing::info!(source = %source.id, url = %source.url, "Source created");
    Ok((StatusCode::CREATED, ok(source)?))
}

async fn get_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Source> {
    let id = SourceId::new(id);
    match state.service.sources().get_source(&id).await {
        Ok(Some(source)) => ok(source),
        Ok(None) => Err(ScrapeError::SourceNotFound(id).into()),
        Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

async fn update_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(new): Json<NewSource>,
) -> ApiResult<Source> {
    new.validate()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;
    let id = SourceId::new(id);
    match state.service.sources().update_source(&id, new).await {
        Ok(Some(source)) => ok(source),
        Ok(None) => Err(ScrapeError::SourceNotFound(id).into()),
        Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

async fn scrape_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Row>> {
    let cancel = state.shutdown.child_token();
    let rows = state
        .service
        .run_scrape(&SourceId::new(id), &cancel)
        .await?;
    ok(rows)
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<History> {
    ok(state.service.history(&SourceId::new(id)).await?)
}

async fn export_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = SourceId::new(id);
    let table = state.service.export_history(&id).await?;
    let body = table
        .to_csv()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let disposition = format!("attachment; filename={}.csv", id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
