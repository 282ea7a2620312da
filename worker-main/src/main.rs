use anyhow::Result;
use dotenvy::dotenv;
use runweaver_base::DEFAULT_LOG_FILTER;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worker_app::engine::scripted::{ScriptAction, ScriptedEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER.as_str())),
        )
        .init();

    // A scripted engine stands in until a real reasoning backend is wired
    // in; the orchestration path it exercises is the production one.
    let engine = Arc::new(ScriptedEngine::new(vec![ScriptAction::Message {
        deltas: vec!["Hello".to_string(), " from runweaver".to_string()],
        final_text: None,
    }]));
    runworker_main::boot_worker(engine).await
}
