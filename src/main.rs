use std::net::SocketAddr;
use std::sync::Arc;

use plant_disease_service_rs::{
    catalog::DiseaseClass, config::ServiceConfig, routes, state::AppState,
    utils::ensure_model_file,
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServiceConfig::from_env()?;

    let level = if config.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.debug)
        .init();

    if let Err(err) = ensure_model_file(&config.model_path, config.model_url.as_deref()).await {
        warn!("Could not fetch the model: {}", err);
    }

    let state = Arc::new(AppState::from_config(config.clone()));
    let model_loaded = state.model_loaded().await;
    print_banner(&config, model_loaded);

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn print_banner(config: &ServiceConfig, model_loaded: bool) {
    let on_off = |flag: bool, on: &str, off: &str| if flag { on.to_string() } else { off.to_string() };

    println!();
    println!("{}", "=".repeat(60));
    println!("Tomato disease detection service");
    println!("{}", "=".repeat(60));
    println!("URL:           http://0.0.0.0:{}", config.port);
    println!("Backend:       {}", config.backend_url);
    println!("API key:       {}", config.masked_api_key());
    println!(
        "Model:         {}",
        on_off(model_loaded, "loaded", "not loaded (demo mode)")
    );
    println!(
        "Backend relay: {}",
        on_off(config.send_to_backend, "enabled", "disabled")
    );
    println!("Classes:       {}", DiseaseClass::ALL.len());
    println!("{}", "=".repeat(60));
    println!();
    println!("Routes:");
    println!("   GET  /health           service status");
    println!("   POST /predict          analyse one image");
    println!("   POST /predict-batch    analyse several images");
    println!("   GET  /stats            configuration and classes");
    println!("   POST /reload-model     reload the model from disk");
    println!("   GET  /test-backend     check backend connectivity");
    println!();
    println!("Uploaded images are dropped once analysed.");
    println!("{}", "=".repeat(60));
    println!();
}
