pub mod client;
pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;

use crate::config::Config;
use crate::database::postgres::{PgAttemptStore, PgExamCatalog};
use crate::services::attempt_service::{AttemptPolicy, AttemptService};

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let policy = AttemptPolicy {
            certificate_threshold: config.certificate_threshold,
            deadline_grace: Duration::seconds(config.deadline_grace_seconds),
        };
        let attempt_service = AttemptService::new(
            Arc::new(PgAttemptStore::new(pool.clone())),
            Arc::new(PgExamCatalog::new(pool)),
            policy,
        );
        Self::with_service(attempt_service, &config.jwt_secret)
    }

    pub fn with_service(attempt_service: AttemptService, jwt_secret: &str) -> Self {
        Self {
            attempt_service,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
