use super::{
    DeleteFilesBody, DeleteFilesResponse, FileKeyQuery, HealthResponse, ListItem, ListQuery,
    ListResponse, PutFileQuery, PutFileResponse, ServerState, ServersResponse, error_response,
    response_error,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    DeleteFilesOperationRequest, FileMetadata, ListFilesOperationRequest, PutFileOperationOutcome,
    PutFileOperationRequest, ReadFileOperationOutcome, ReadFileOperationRequest, VersionedMap,
};
use tokio_util::io::ReaderStream;

const SERVERS_PAGE_SIZE: usize = 256;

pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.engine.local_node_id().to_string(),
        group: state.config.group.clone(),
    })
}

pub(crate) async fn v1_put_file(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PutFileQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let quorum = query
        .quorum
        .unwrap_or(state.engine.replication().default_quorum);

    let operation_result = state
        .engine
        .put_file_operation
        .run(PutFileOperationRequest {
            name: query.name,
            body,
            quorum,
            timeout: query.timeout_ms.map(Duration::from_millis),
        })
        .await;

    let (status, label, result) = match operation_result {
        Ok(PutFileOperationOutcome::Replicated(result)) => {
            (StatusCode::CREATED, "replicated", result)
        }
        Ok(PutFileOperationOutcome::Accepted(result)) => (StatusCode::ACCEPTED, "accepted", result),
        Ok(PutFileOperationOutcome::Conflict) => {
            return response_error(StatusCode::CONFLICT, "file is being deleted");
        }
        Err(error) => return error_response(error),
    };

    let response = PutFileResponse {
        key: result.key,
        partition: result.partition,
        size: result.size,
        check_sum: result.check_sum,
        quorum: result.quorum,
        status: label.to_string(),
    };

    (status, Json(response)).into_response()
}

pub(crate) async fn v1_get_file(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<FileKeyQuery>,
) -> impl IntoResponse {
    let outcome = state
        .engine
        .read_file_operation
        .run(ReadFileOperationRequest { key: query.key })
        .await;

    match outcome {
        Ok(ReadFileOperationOutcome::Local { metadata, file }) => {
            local_file_response(&metadata, file).await
        }
        Ok(ReadFileOperationOutcome::Remote { metadata, body, .. }) => {
            let length = body.len() as u64;
            file_response(&metadata, length, Body::from(body))
        }
        Ok(ReadFileOperationOutcome::NotFound) => {
            response_error(StatusCode::NOT_FOUND, "file not found")
        }
        Err(error) => error_response(error),
    }
}

/// Content-Length follows the bytes actually on disk, which can drift from
/// the recorded size until the watchdog repairs the replica.
async fn local_file_response(metadata: &FileMetadata, file: tokio::fs::File) -> Response {
    let length = match file.metadata().await {
        Ok(stat) => stat.len(),
        Err(error) => return error_response(error.into()),
    };
    file_response(metadata, length, Body::from_stream(ReaderStream::new(file)))
}

fn file_response(metadata: &FileMetadata, length: u64, body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert("x-stowage-checksum", HeaderValue::from(metadata.check_sum));
    response
}

pub(crate) async fn v1_delete_files(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<DeleteFilesBody>,
) -> impl IntoResponse {
    let result = match state
        .engine
        .delete_files_operation
        .run(DeleteFilesOperationRequest { keys: body.keys })
        .await
    {
        Ok(result) => result,
        Err(error) => return error_response(error),
    };

    let response = DeleteFilesResponse {
        deleted: result.deleted,
        not_found: result.not_found,
        anomalous: result.anomalous,
    };

    (StatusCode::OK, Json(response)).into_response()
}

pub(crate) async fn v1_list_metadata(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let result = match state
        .engine
        .list_files_operation
        .run(ListFilesOperationRequest {
            cursor: query.cursor.filter(|cursor| !cursor.is_empty()),
            limit: query.limit,
        })
        .await
    {
        Ok(result) => result,
        Err(error) => return error_response(error),
    };

    let response = ListResponse {
        items: result
            .items
            .into_iter()
            .map(|item| ListItem {
                key: item.key,
                version: item.version,
                metadata: item.metadata,
            })
            .collect(),
        next_cursor: result.next_cursor,
    };

    (StatusCode::OK, Json(response)).into_response()
}

pub(crate) async fn v1_servers(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let servers_map = state.engine.servers();
    let mut servers = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = match servers_map
            .scan_from(cursor.as_deref(), SERVERS_PAGE_SIZE)
            .await
        {
            Ok(page) => page,
            Err(error) => return error_response(error),
        };
        let exhausted = page.len() < SERVERS_PAGE_SIZE;
        cursor = page.last().map(|(key, _)| key.clone());
        servers.extend(page.into_iter().map(|(_, versioned)| versioned.value));

        if exhausted || cursor.is_none() {
            break;
        }
    }

    (StatusCode::OK, Json(ServersResponse { servers })).into_response()
}
