use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::{ChallengeConfig, SandboxConfig, ServerConfig};
use crate::queue::GradeQueue;
use crate::routes::{
    get_challenge_by_id_handler, get_challenges_handler, get_progress_handler,
    get_submission_by_id_handler, get_submissions_handler, json_error_handler,
    query_error_handler, run_code_handler, submit_challenge_handler,
};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub challenges: Arc<Vec<ChallengeConfig>>,
    pub sandbox: Arc<SandboxConfig>,
    pub db_pool: Arc<SqlitePool>,
    pub queue: Arc<GradeQueue>,
}

/// Registers every route and error handler on an `App`
///
/// Shared by the server and the integration tests.
pub fn configure_app(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::from(state.challenges))
            .app_data(web::Data::from(state.sandbox))
            .app_data(web::Data::from(state.db_pool))
            .app_data(web::Data::from(state.queue))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .service(run_code_handler)
            .service(get_challenges_handler)
            .service(get_challenge_by_id_handler)
            .service(submit_challenge_handler)
            .service(get_submissions_handler)
            .service(get_submission_by_id_handler)
            .service(get_progress_handler);
    }
}

pub fn build_server(server_config: ServerConfig, state: AppState) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(configure_app(state.clone()))
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
