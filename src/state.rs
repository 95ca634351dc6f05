//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        burn_scheduler::BurnScheduler,
        download_service::DownloadService,
        file_repository::FileRepository,
        rate_limiter::IpRateLimiter,
        scanner::Scanner,
        upload_service::{UploadPolicy, UploadService},
    },
    storage::StorageProvider,
};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: FileRepository,
    pub storage: Arc<dyn StorageProvider>,
    pub upload: UploadService,
    pub download: DownloadService,
    pub limiter: IpRateLimiter,
    pub burn: BurnScheduler,
}

impl AppState {
    /// Wire the services together from already-initialized components.
    pub fn new(
        config: AppConfig,
        repo: FileRepository,
        storage: Arc<dyn StorageProvider>,
        scanner: Option<Arc<dyn Scanner>>,
        burn: BurnScheduler,
    ) -> Self {
        let upload = UploadService::new(
            storage.clone(),
            repo.clone(),
            scanner,
            UploadPolicy::from_config(&config),
        );
        let download = DownloadService::new(
            storage.clone(),
            repo.clone(),
            burn.clone(),
            config.preview_max_bytes,
        )
        .with_claim_heartbeat(config.reaper.stale_claim_after / 3);
        let limiter = IpRateLimiter::new(&config.rate_limit);
        Self {
            config: Arc::new(config),
            repo,
            storage,
            upload,
            download,
            limiter,
            burn,
        }
    }
}

impl FromRef<AppState> for IpRateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.limiter.clone()
    }
}
