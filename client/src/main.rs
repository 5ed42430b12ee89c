use std::path::PathBuf;

use sightguide_client::app::{Runtime, View};
use sightguide_client::console::spawn_stdin_reader;
use sightguide_client::speech::recognition::recognizer_for;
use sightguide_client::speech::synthesis::synthesizer_for;
use sightguide_common::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let start_name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| config.client.start_view.clone());
    let start: View = match start_name.parse() {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "invalid start view");
            std::process::exit(1);
        }
    };

    info!(
        api_base = config.client.api_base,
        ws_url = config.client.ws_url,
        camera = config.camera.url,
        mode = config.camera.mode,
        start = %start,
        "starting sightguide client"
    );

    let console = spawn_stdin_reader();
    let recognizer = recognizer_for(&config.speech, console.clone());
    let synth = synthesizer_for(&config.speech).await;

    let runtime = match Runtime::new(config, console, recognizer, synth) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.run(start).await {
        error!(error = %e, "assistant failed");
        std::process::exit(1);
    }
    // stdin reader may still be blocked on a read
    std::process::exit(0);
}
