//! Stable Diffusion WebUI serverless worker
//!
//! This application starts (or waits for) an AUTOMATIC1111 WebUI instance,
//! selects the configured checkpoint, and forwards queued generation jobs to
//! its `txt2img` / `img2img` API.

mod api;
mod conversion;
mod core;
mod models;

use crate::api::endpoints::{AppState, create_router};
use crate::core::client::WebUiClient;
use crate::core::config::Config;
use crate::core::handler::JobHandler;
use crate::core::launcher::WebUiProcess;
use crate::core::logging::init_logging;
use crate::core::queues::{RunpodQueue, TestInputQueue};
use crate::core::readiness::{ReadinessConfig, set_model_checkpoint, wait_for_service};
use crate::core::retry::RetryPolicy;
use crate::core::worker::run_worker;
use crate::models::job::JobResult;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How the worker receives jobs
enum Mode {
    Queue,
    TestInput(String),
    ServeApi,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help") {
        print_help();
        return;
    }

    let mode = match parse_mode(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Run with --help for usage.");
            std::process::exit(2);
        }
    };

    dotenv::dotenv().ok();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config.server.log_level);

    print_startup_banner(&config);

    if matches!(mode, Mode::Queue) && !config.queue_configured() {
        error!(
            "No job queue configured. Set RUNPOD_WEBHOOK_GET_JOB and RUNPOD_WEBHOOK_POST_OUTPUT, \
             or run with --test-input / --serve-api"
        );
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let code = run(config, mode, &cancel).await;
    std::process::exit(code);
}

/// Start the WebUI, wait for it, then process jobs. Returns the exit code.
async fn run(config: Arc<Config>, mode: Mode, cancel: &CancellationToken) -> i32 {
    let mut process = if config.webui.launch.enabled {
        match WebUiProcess::spawn(&config.webui.launch) {
            Ok(process) => Some(process),
            Err(e) => {
                error!("{:#}", e);
                return 1;
            }
        }
    } else {
        None
    };

    let code = serve(&config, mode, process.as_mut(), cancel).await;

    if let Some(process) = process.as_mut() {
        process.shutdown().await;
    }
    code
}

async fn serve(
    config: &Arc<Config>,
    mode: Mode,
    process: Option<&mut WebUiProcess>,
    cancel: &CancellationToken,
) -> i32 {
    let client = match WebUiClient::new(&config.webui.base_url, &config.request) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return 1;
        }
    };
    let probe = client.clone().with_retry_policy(RetryPolicy::none());

    // 1. Wait for the WebUI API
    let readiness = ReadinessConfig::from(&config.webui);
    if let Err(e) = wait_for_service(&probe, &readiness, process, cancel).await {
        error!("{}", e);
        return 1;
    }

    // 2. Select the checkpoint
    if config.webui.checkpoint.is_empty() {
        info!("No checkpoint configured, keeping the WebUI default");
    } else {
        set_model_checkpoint(&client, &config.webui.checkpoint).await;
    }

    let handler = Arc::new(JobHandler::new(client, config.defaults.clone()));
    let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);

    info!("WebUI setup complete. Starting worker...");

    match mode {
        Mode::Queue => {
            let queue = match RunpodQueue::from_config(&config.queue) {
                Some(Ok(queue)) => queue,
                Some(Err(e)) => {
                    error!("Failed to create job queue client: {}", e);
                    return 1;
                }
                None => {
                    error!("Job queue URLs are not configured");
                    return 1;
                }
            };
            run_worker(&queue, &handler, poll_interval, cancel).await;
            0
        }
        Mode::TestInput(arg) => {
            let queue = match TestInputQueue::from_arg(&arg) {
                Ok(queue) => queue,
                Err(e) => {
                    error!("{:#}", e);
                    return 1;
                }
            };
            run_worker(&queue, &handler, poll_interval, cancel).await;
            print_test_result(&queue).await
        }
        Mode::ServeApi => {
            let state = AppState {
                config: config.clone(),
                handler,
                probe,
            };
            serve_api(state, cancel).await
        }
    }
}

async fn serve_api(state: AppState, cancel: &CancellationToken) -> i32 {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return 1;
        }
    };

    info!("Local test API listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
    {
        error!("Server error: {}", e);
        return 1;
    }
    0
}

async fn print_test_result(queue: &TestInputQueue) -> i32 {
    let Some(result) = queue.result().await else {
        warn!("Test job did not run");
        return 1;
    };

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize result: {}", e),
    }
    if matches!(result, JobResult::Error(_)) { 1 } else { 0 }
}

/// Cancel the token on Ctrl-C
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            cancel.cancel();
        }
    });
}

fn parse_mode(args: &[String]) -> Result<Mode, String> {
    let mut mode = Mode::Queue;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--serve-api" => mode = Mode::ServeApi,
            "--test-input" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--test-input requires a value".to_string())?;
                mode = Mode::TestInput(value.clone());
            }
            other => {
                if let Some(value) = other.strip_prefix("--test-input=") {
                    mode = Mode::TestInput(value.to_string());
                } else {
                    return Err(format!("Unknown argument: {}", other));
                }
            }
        }
    }
    Ok(mode)
}

/// Print startup banner with configuration
fn print_startup_banner(config: &Config) {
    println!("🚀 Stable Diffusion WebUI worker v{}", env!("CARGO_PKG_VERSION"));
    println!("✅ Configuration loaded successfully");
    println!("   WebUI API: {}", config.webui.base_url);
    if config.webui.launch.enabled {
        println!(
            "   Launch: {} {}",
            config.webui.launch.command,
            config.webui.launch.args.join(" ")
        );
    }
    if !config.webui.checkpoint.is_empty() {
        println!("   Checkpoint: {}", config.webui.checkpoint);
    }
    println!("   Inference Timeout: {}s", config.request.inference_timeout);
    println!("   Max Retries: {}", config.request.max_retries);
    println!(
        "   Job Queue: {}",
        if config.queue_configured() {
            "Configured"
        } else {
            "Not configured"
        }
    );
    println!();
}

/// Print help message
fn print_help() {
    println!("Stable Diffusion WebUI worker v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: sdwebui-worker [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --help                Display this help message");
    println!("  --test-input <JSON>   Run one job from a JSON literal or file and exit");
    println!("  --serve-api           Serve a local test API instead of polling a job queue");
    println!();
    println!("Configuration is read from CONFIG_PATH (default: config.toml).");
    println!();
    println!("Environment variables:");
    println!("  WEBUI_BASE_URL - WebUI API base URL (default: http://127.0.0.1:3000/sdapi/v1)");
    println!("  SD_MODEL_CHECKPOINT - Checkpoint selected at startup");
    println!("  RUNPOD_WEBHOOK_GET_JOB - Job take URL ($ID = worker id)");
    println!("  RUNPOD_WEBHOOK_POST_OUTPUT - Job result URL ($ID = job id)");
    println!("  RUNPOD_AI_API_KEY - Job queue API key");
    println!("  RUNPOD_POD_ID - Worker id");
    println!("  LOG_LEVEL - Logging level (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_default_mode_is_queue() {
        assert!(matches!(parse_mode(&[]), Ok(Mode::Queue)));
    }

    #[test]
    fn test_parse_test_input() {
        match parse_mode(&args(&["--test-input", "{\"input\":{}}"])) {
            Ok(Mode::TestInput(value)) => assert_eq!(value, "{\"input\":{}}"),
            _ => panic!("expected test input mode"),
        }
        assert!(matches!(
            parse_mode(&args(&["--test-input=test_input.json"])),
            Ok(Mode::TestInput(_))
        ));
        assert!(parse_mode(&args(&["--test-input"])).is_err());
    }

    #[test]
    fn test_parse_serve_api_and_unknown() {
        assert!(matches!(
            parse_mode(&args(&["--serve-api"])),
            Ok(Mode::ServeApi)
        ));
        assert!(parse_mode(&args(&["--bogus"])).is_err());
    }
}
