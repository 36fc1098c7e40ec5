use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cashflow_forecaster::statement::{parse_statement, ColumnMap, ParsedStatement, StatementType};
use cashflow_forecaster::{ForecastEngine, ForecastError, ForecastMethod, ScheduledEvent, Transaction};

#[derive(Debug, Deserialize)]
struct ForecastRequest {
    #[serde(default)]
    opening_balance: f64,
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    scheduled: Vec<ScheduledEvent>,
    #[serde(default = "default_horizon")]
    horizon_days: i64,
    #[serde(default = "default_method")]
    method: String,
}

fn default_horizon() -> i64 {
    30
}

fn default_method() -> String {
    "prophet".to_string()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn forecast(
    State(engine): State<Arc<ForecastEngine>>,
    Json(request): Json<ForecastRequest>,
) -> Response {
    let method = ForecastMethod::resolve(&request.method);
    match engine.run_forecast(
        request.opening_balance,
        &request.transactions,
        &request.scheduled,
        request.horizon_days,
        method,
        None,
    ) {
        Ok(response) => Json(response).into_response(),
        Err(ForecastError::InvalidHorizon(_)) => {
            error_response(StatusCode::BAD_REQUEST, "horizon_days must be at least 1")
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Default)]
struct ImportForm {
    files: Vec<(Option<String>, Vec<u8>)>,
    column_map: Option<String>,
    delimiter: Option<String>,
    statement_types_json: Option<String>,
    statement_type_fields: Vec<String>,
}

async fn read_import_form(multipart: &mut Multipart) -> Result<ImportForm, Response> {
    let mut form = ImportForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(error_response(StatusCode::BAD_REQUEST, err.to_string()));
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))?;
                form.files.push((filename, data.to_vec()));
            }
            "column_map" => {
                form.column_map = field.text().await.ok();
            }
            "delimiter" => {
                form.delimiter = field.text().await.ok();
            }
            "statement_types" => {
                form.statement_types_json = field.text().await.ok();
            }
            "statement_type" => {
                if let Ok(text) = field.text().await {
                    form.statement_type_fields.push(text);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

fn file_result(parsed: &ParsedStatement, fallback_name: Option<&str>) -> Value {
    json!({
        "filename": parsed.filename.clone().or_else(|| fallback_name.map(str::to_string)),
        "statement_type": parsed.statement_type.clone(),
        "summary": parsed.summary.clone(),
        "preview": parsed.preview.clone(),
        "columns": parsed.columns.clone(),
        "transaction_count": parsed.transactions.len(),
    })
}

async fn import_statement(
    State(_engine): State<Arc<ForecastEngine>>,
    mut multipart: Multipart,
) -> Response {
    let form = match read_import_form(&mut multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    if form.files.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing statement file");
    }

    let column_map: Option<ColumnMap> = match &form.column_map {
        Some(raw) if !raw.trim().is_empty() => match serde_json::from_str(raw) {
            Ok(map) => Some(map),
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "column_map must be valid JSON");
            }
        },
        _ => None,
    };

    let statement_types: Vec<String> = if let Some(raw) = &form.statement_types_json {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "statement_types must be valid JSON",
                );
            }
        }
    } else {
        form.statement_type_fields.clone()
    };
    let default_type = form
        .statement_type_fields
        .first()
        .cloned()
        .unwrap_or_else(|| "credit_card".to_string());

    let delimiter = form
        .delimiter
        .as_deref()
        .and_then(|d| d.chars().next());

    let mut aggregated: Vec<cashflow_forecaster::statement::StatementTransaction> = Vec::new();
    let mut file_results: Vec<Value> = Vec::new();

    for (idx, (filename, data)) in form.files.iter().enumerate() {
        let Some(filename) = filename.as_deref().filter(|n| !n.is_empty()) else {
            return error_response(StatusCode::BAD_REQUEST, "Uploaded file has no name");
        };

        let type_raw = statement_types
            .get(idx)
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| default_type.clone());
        let statement_type = match StatementType::parse(&type_raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                return error_response(StatusCode::BAD_REQUEST, format!("{filename}: {err}"));
            }
        };

        let parsed = match parse_statement(
            data,
            Some(filename),
            statement_type,
            column_map.as_ref(),
            delimiter,
        ) {
            Ok(parsed) => parsed,
            Err(ForecastError::Csv(_)) | Err(ForecastError::Io(_)) => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to parse {filename}"),
                );
            }
            Err(err) => {
                return error_response(StatusCode::BAD_REQUEST, format!("{filename}: {err}"));
            }
        };

        aggregated.extend(parsed.transactions.iter().cloned());
        file_results.push(file_result(&parsed, Some(filename)));
    }

    aggregated.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.description.cmp(&b.description))
            .then_with(|| a.amount.partial_cmp(&b.amount).unwrap_or(std::cmp::Ordering::Equal))
    });

    let aggregate_summary = if aggregated.is_empty() {
        Value::Null
    } else {
        let total_charges: f64 = aggregated
            .iter()
            .filter(|t| t.amount < 0.0)
            .map(|t| t.amount.abs())
            .sum();
        let total_payments: f64 = aggregated
            .iter()
            .filter(|t| t.amount > 0.0)
            .map(|t| t.amount)
            .sum();
        let net: f64 = aggregated.iter().map(|t| t.amount).sum();
        json!({
            "count": aggregated.len(),
            "start_date": aggregated.first().map(|t| t.date.format("%Y-%m-%d").to_string()),
            "end_date": aggregated.last().map(|t| t.date.format("%Y-%m-%d").to_string()),
            "total_charges": total_charges,
            "total_payments": total_payments,
            "net": net,
        })
    };

    let preview: Vec<_> = aggregated.iter().take(10).cloned().collect();

    Json(json!({
        "transactions": aggregated,
        "summary": aggregate_summary,
        "preview": preview,
        "files": file_results,
    }))
    .into_response()
}

fn app(engine: Arc<ForecastEngine>) -> Router {
    Router::new()
        .route("/forecast", post(forecast))
        .route("/import/statement", post(import_statement))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(5000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let engine = Arc::new(ForecastEngine::new());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "cashflow forecaster listening");

    axum::serve(listener, app(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
