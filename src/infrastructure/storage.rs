use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::info;

use crate::config::{S3Settings, StorageConfig};
use crate::services::disk::DiskBackend;
use crate::services::engine::UploadEngine;
use crate::services::meta_store::{DiskMetaStore, MemoryMetaStore, MetaStore};
use crate::services::metrics::TracingMetrics;
use crate::services::s3::S3Backend;
use crate::services::storage::{BackendKind, PayloadBackend};

/// Builds an S3 client from explicit settings, falling back to the
/// ambient AWS configuration for anything left unset.
pub async fn setup_s3(settings: &S3Settings) -> aws_sdk_s3::Client {
    info!(
        "☁️  S3 Storage: {} (Bucket: {})",
        settings.endpoint.as_deref().unwrap_or("default endpoint"),
        settings.bucket
    );

    let mut loader = aws_config::from_env().region(Region::new(settings.region.clone()));
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "static",
        ));
    }
    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(settings.force_path_style)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Wires backend, metadata store and metrics for the configured backend.
pub async fn build_engine(config: StorageConfig) -> anyhow::Result<UploadEngine> {
    let (backend, meta): (Arc<dyn PayloadBackend>, Arc<dyn MetaStore>) = match config.backend {
        BackendKind::Disk => {
            tokio::fs::create_dir_all(&config.directory).await?;
            info!("💾 Disk Storage: {}", config.directory.display());
            (
                Arc::new(DiskBackend::new(&config)),
                Arc::new(DiskMetaStore::new(
                    config.directory.clone(),
                    config.meta_prefix.clone(),
                    config.meta_suffix.clone(),
                )),
            )
        }
        BackendKind::S3 => {
            let client = setup_s3(&config.s3).await;
            (
                Arc::new(S3Backend::new(
                    client,
                    config.s3.bucket.clone(),
                    config.retry.clone(),
                )),
                Arc::new(MemoryMetaStore::new()),
            )
        }
    };

    Ok(UploadEngine::new(backend, meta, config).with_metrics(Arc::new(TracingMetrics)))
}
