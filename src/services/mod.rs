pub mod access_code;
pub mod burn_scheduler;
pub mod download_service;
pub mod file_repository;
pub mod rate_limiter;
pub mod reaper;
pub mod scanner;
pub mod upload_service;
