use super::{
    FileKeyQuery, ResyncBody, ResyncResponse, ServerState, error_response, response_error,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use stowage_core::{FileKey, ResyncNodeOperationRequest};
use tokio_util::io::ReaderStream;

/// Raw replica bytes for peers. Absent files are a plain 404 so the caller
/// moves on to the next holder.
pub(crate) async fn internal_get_blob(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<FileKeyQuery>,
) -> impl IntoResponse {
    let key = match FileKey::parse(&query.key) {
        Ok(key) => key,
        Err(error) => return error_response(error),
    };

    let file = match state.engine.blob_store().read(&key).await {
        Ok(Some(file)) => file,
        Ok(None) => return response_error(StatusCode::NOT_FOUND, "blob not found"),
        Err(error) => return error_response(error),
    };

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

pub(crate) async fn v1_internal_resync(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ResyncBody>,
) -> impl IntoResponse {
    let result = match state
        .engine
        .resync_node_operation
        .run(ResyncNodeOperationRequest {
            node_id: body.node_id.clone(),
            key: body.key,
        })
        .await
    {
        Ok(result) => result,
        Err(error) => return error_response(error),
    };

    let response = ResyncResponse {
        node_id: body.node_id,
        resynced: result.resynced,
        skipped: result.skipped,
        anomalous: result.anomalous,
    };

    (StatusCode::OK, Json(response)).into_response()
}
