use std::net::SocketAddr;

use clap::Parser;
use tokengate::cli::{
    Args, build_config, init_logging, lifetimes_from_args, load_jwt_secret, oauth_from_args,
    open_database, validate_origin,
};
use tokengate::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(client_url) = validate_origin("client-url", &args.client_url) else {
        std::process::exit(1);
    };

    let Some(server_url) = validate_origin("server-url", &args.server_url) else {
        std::process::exit(1);
    };

    let Some(lifetimes) = lifetimes_from_args(&args) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read local address");
        std::process::exit(1);
    });

    let oauth = oauth_from_args(&args, &server_url);
    let config = build_config(&args, db, jwt_secret, client_url, lifetimes, oauth);

    init_cleanup(&config.db, &config.lifetimes).await;
    let app = create_app(&config);

    info!(address = %local_addr, "Listening");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
