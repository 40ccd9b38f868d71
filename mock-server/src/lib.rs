use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    body::Body,
    extract::{rejection::FormRejection, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const DEFAULT_DELIMITER: &str = "\n\n";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u32,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default = "default_count")]
    pub count: u32,
    pub delimiter: Option<String>,
}

fn default_count() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub fn app() -> Router {
    Router::new()
        .route("/item", get(item))
        .route("/stream", get(stream))
        .route("/broken", get(broken))
        .route("/empty", get(empty))
        .route("/echo", post(echo))
        .route("/slow", get(slow))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn item() -> Json<Item> {
    Json(Item { id: 7 })
}

/// Encode `count` items as delimiter-terminated JSON messages.
pub fn stream_body(count: u32, delimiter: &str) -> Vec<String> {
    (0..count)
        .map(|id| {
            let json = serde_json::to_string(&Item { id }).unwrap_or_default();
            format!("{json}{delimiter}")
        })
        .collect()
}

fn chunked(parts: Vec<String>) -> Response {
    let stream = futures::stream::iter(parts.into_iter().map(Ok::<_, Infallible>));
    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn stream(Query(params): Query<StreamParams>) -> Response {
    let delimiter = params.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER);
    tracing::debug!(count = params.count, "streaming items");
    chunked(stream_body(params.count, delimiter))
}

async fn broken() -> Response {
    chunked(vec![
        "{\"id\"}\n\n".to_string(),
        "{\"id\": 1}\n\n".to_string(),
    ])
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn echo(form: Result<Form<BTreeMap<String, String>>, FormRejection>) -> Response {
    match form {
        Ok(Form(fields)) if !fields.is_empty() => Json(fields).into_response(),
        _ => (StatusCode::BAD_REQUEST, "Please provide valid input.").into_response(),
    }
}

async fn slow(Query(params): Query<SlowParams>) -> Json<Item> {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    Json(Item { id: 0 })
}
