//! Statement preview server.
//!
//! Serves the definitions found in the settings file over HTTP. The storage
//! collaborator is an echo, so each response carries the rendered statements
//! instead of database results; embed the library with a real [`Storage`] to
//! execute them.
//!
//! [`Storage`]: supersequel::storage::Storage

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use supersequel::helpers;
use supersequel::server::{MiddlewareConfig, principal_from_headers};
use supersequel::settings::Settings;
use supersequel::storage::EchoStorage;
use supersequel::Supersequel;

#[tokio::main]
async fn main() {
    let path = std::env::args().nth(1);
    let settings = match Settings::load(path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = serve(settings).await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}

async fn serve(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Supersequel::builder()
        .helpers(helpers::standard(settings.helpers.prefix.clone()))
        .storage(EchoStorage)
        .build()?;
    let middleware = Arc::new(engine).middleware(MiddlewareConfig { definitions: settings.definitions })?;
    let app = middleware
        .router(&settings.server.path)
        .layer(axum::middleware::from_fn(principal_from_headers));
    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    info!(bind = %settings.server.bind, path = %settings.server.path, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
