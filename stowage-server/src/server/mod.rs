use crate::config::{Config, MetaBackend};
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use stowage_core::{
    BlobStore, EtcdMetaMap, FileMetadata, HttpPeerClient, INTERNAL_BLOB_URI, MemMetaMap, Result,
    ServerMetadata, StoreEngine, StoreEngineConfig, StowError, VersionedMap,
};
use tokio::net::TcpListener;

mod external;
mod internal;
mod types;

use external::{
    health, v1_delete_files, v1_get_file, v1_list_metadata, v1_put_file, v1_servers,
};
use internal::{internal_get_blob, v1_internal_resync};
pub(crate) use types::*;

pub struct ServerState {
    pub(crate) config: Config,
    pub(crate) engine: StoreEngine,
}

type MetaMaps = (
    Arc<dyn VersionedMap<FileMetadata>>,
    Arc<dyn VersionedMap<ServerMetadata>>,
);

pub async fn run_server(config: Config) -> Result<()> {
    let node_cfg = config.local_node()?.clone();
    let membership = Arc::new(config.membership()?);
    let replication = config.replication_settings();

    let (files, servers) = open_meta_maps(&config).await?;
    tracing::info!(
        "Metadata backend {:?}: partitions={} backup_factor={}",
        config.meta.backend,
        config.replication.partition_count,
        config.replication.backup_factor
    );

    let blob_store = Arc::new(BlobStore::new(
        config.file_root.clone(),
        config.current_node.clone(),
    )?);
    let peers = Arc::new(HttpPeerClient::new(
        membership.clone(),
        replication.peer_timeout,
    )?);

    let engine = StoreEngine::new(StoreEngineConfig {
        local_node_id: config.current_node.clone(),
        membership,
        files,
        servers,
        blob_store,
        peers,
        replication,
        watchdog: config.watchdog_settings(),
        meta_root: config.meta_root(),
    })?;
    let tasks = engine.start().await?;

    let state = Arc::new(ServerState { config, engine });

    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/files",
            get(v1_get_file).post(v1_put_file).delete(v1_delete_files),
        )
        .route("/api/v1/metadata", get(v1_list_metadata))
        .route("/api/v1/servers", get(v1_servers))
        .route(INTERNAL_BLOB_URI, get(internal_get_blob))
        .route("/internal/v1/resync", post(v1_internal_resync))
        .with_state(state);

    let listener = TcpListener::bind(&node_cfg.bind_addr).await?;
    tracing::info!(
        "Stowage node {} listening on {}",
        node_cfg.node_id,
        node_cfg.bind_addr
    );

    let served = axum::serve(listener, app)
        .await
        .map_err(|error| StowError::Http(error.to_string()));
    tasks.abort();

    served
}

async fn open_meta_maps(config: &Config) -> Result<MetaMaps> {
    match config.meta.backend {
        MetaBackend::Memory => {
            if config.nodes.len() > 1 {
                tracing::warn!(
                    "Memory metadata backend is process-local; peers of group {} will not see it",
                    config.group
                );
            }
            let files: Arc<dyn VersionedMap<FileMetadata>> =
                Arc::new(MemMetaMap::<FileMetadata>::new());
            let servers: Arc<dyn VersionedMap<ServerMetadata>> =
                Arc::new(MemMetaMap::<ServerMetadata>::new());
            Ok((files, servers))
        }
        MetaBackend::Etcd => {
            let etcd_cfg = config.meta.etcd.as_ref().ok_or_else(|| {
                StowError::Config("etcd configuration is required for etcd backend".to_string())
            })?;
            let root = format!("{}/{}", etcd_cfg.prefix.trim_end_matches('/'), config.group);

            let files: Arc<dyn VersionedMap<FileMetadata>> = Arc::new(
                EtcdMetaMap::<FileMetadata>::connect(&etcd_cfg.endpoints, &format!("{}/files", root))
                    .await?,
            );
            let servers: Arc<dyn VersionedMap<ServerMetadata>> = Arc::new(
                EtcdMetaMap::<ServerMetadata>::connect(
                    &etcd_cfg.endpoints,
                    &format!("{}/servers", root),
                )
                .await?,
            );

            Ok((files, servers))
        }
    }
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(crate) fn error_response(error: StowError) -> Response {
    let status = match &error {
        StowError::InUse(_) => StatusCode::CONFLICT,
        StowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StowError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    response_error(status, error.to_string())
}
