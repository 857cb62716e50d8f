/*!
Here we go!
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    Router,
    routing::{get_service, post},
};
use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tokio::sync::RwLock;
use tower_http::services::fs::{ServeDir, ServeFile};

use uni::{config, inter};

async fn catchall_error_handler(e: std::io::Error) -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unhandled internal error: {}", &e)
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("uni")
        .build();
    TermLogger::init(
        uni::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();
    log::info!("Logging started.");

    let cfg_path = std::env::args().nth(1)
        .unwrap_or_else(|| "uni.toml".to_owned());
    let glob = config::load_configuration(&cfg_path).await.unwrap();
    let addr = glob.addr;

    inter::init("templates/").unwrap();

    let serve_root = get_service(ServeFile::new("data/index.html"))
        .handle_error(catchall_error_handler);

    let serve_static = get_service(ServeDir::new("static"))
        .handle_error(catchall_error_handler);

    let glob = Arc::new(RwLock::new(glob));

    let api_routes = Router::new()
        .route("/api/student", post(inter::student::api))
        .route("/api/teacher", post(inter::teacher::api))
        .route("/api/admin", post(inter::admin::api))
        .layer(middleware::from_fn(inter::key_authenticate))
        .layer(middleware::from_fn(inter::request_identity));

    let app = Router::new()
        .route("/", serve_root)
        .nest_service("/static", serve_static)
        .route("/login/student", post(inter::student::login))
        .route("/login/teacher", post(inter::teacher::login))
        .route("/login/admin", post(inter::admin::login))
        .merge(api_routes)
        .layer(Extension(glob));

    log::info!("Listening on {}", &addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
