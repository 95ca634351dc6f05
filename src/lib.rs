//! Ephemeral file drop with optional end-to-end encryption.

pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
