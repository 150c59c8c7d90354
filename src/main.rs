//! Searchgate
//!
//! Runs queries read from stdin through the throttled, cached search core and
//! prints one JSON line per answer.
//!
//! # Input
//!
//! One command per line. A plain line is a search for that text; a JSON
//! object selects the operation explicitly:
//!
//! ```text
//! climate adaptation
//! {"op": "search", "text": "water", "page": 2, "filters": {"source": ["UN"]}}
//! {"op": "suggest", "text": "wat"}
//! {"op": "login", "ip": "10.0.0.1", "username": "alice", "success": false}
//! ```
//!
//! End of input or Ctrl-C triggers a graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use searchgate::config::{BackendConfig, GatewayConfig};
use searchgate::error::{Error, Result};
use searchgate::metrics::{self, GatewayMetrics, HealthState};
use searchgate::search::{
    HttpBackend, HttpBackendConfig, InMemoryBackend, QueryExecutor, SearchBackend, SearchPage,
    SearchQuery, Suggestions,
};
use searchgate::task::BackgroundTask;
use searchgate::LoginThrottle;

/// How often Prometheus gauges are refreshed from component snapshots
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

type Executor = QueryExecutor<Arc<dyn SearchBackend>>;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Searchgate - throttled, cached document search
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "SEARCHGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Query queue workers
    #[arg(long, env = "SEARCHGATE_WORKERS")]
    workers: Option<usize>,

    /// Query queue buffer size (0 = synchronous handoff)
    #[arg(long, env = "SEARCHGATE_BUFFER")]
    buffer: Option<usize>,

    /// Result cache TTL in seconds
    #[arg(long, env = "SEARCHGATE_CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    /// JSON document corpus for the in-memory backend
    #[arg(long, env = "SEARCHGATE_CORPUS", conflicts_with = "backend_url")]
    corpus: Option<PathBuf>,

    /// Artificial in-memory backend latency in milliseconds
    #[arg(long, env = "SEARCHGATE_LATENCY_MS")]
    latency_ms: Option<u64>,

    /// Base URL of a remote JSON search service
    #[arg(long, env = "SEARCHGATE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Metrics/health server bind address
    #[arg(long, env = "SEARCHGATE_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Do not start the metrics/health server
    #[arg(long, env = "SEARCHGATE_NO_METRICS_SERVER")]
    no_metrics_server: bool,

    /// Bound on graceful shutdown in seconds
    #[arg(long, env = "SEARCHGATE_SHUTDOWN_GRACE_SECS")]
    shutdown_grace_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied
    fn resolve_config(&self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.executor.query_queue.worker_count = workers;
        }
        if let Some(buffer) = self.buffer {
            config.executor.query_queue.buffer_size = buffer;
        }
        if let Some(ttl) = self.cache_ttl_secs {
            config.executor.cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(url) = &self.backend_url {
            let mut http = match &config.backend {
                BackendConfig::Http(http) => http.clone(),
                BackendConfig::InMemory { .. } => HttpBackendConfig::default(),
            };
            http.base_url = url.clone();
            config.backend = BackendConfig::Http(http);
        }
        if self.corpus.is_some() || self.latency_ms.is_some() {
            let (corpus, latency_ms) = match &config.backend {
                BackendConfig::InMemory { corpus, latency_ms } => (corpus.clone(), *latency_ms),
                BackendConfig::Http(_) => (None, 0),
            };
            config.backend = BackendConfig::InMemory {
                corpus: self.corpus.clone().or(corpus),
                latency_ms: self.latency_ms.unwrap_or(latency_ms),
            };
        }
        if let Some(addr) = &self.metrics_addr {
            config.server.metrics_addr = addr.clone();
        }
        if self.no_metrics_server {
            config.server.enabled = false;
        }
        if let Some(grace) = self.shutdown_grace_secs {
            config.shutdown_grace = Duration::from_secs(grace);
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// One line of input
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Search(SearchQuery),
    Suggest { text: String },
    Login { ip: String, username: String, success: bool },
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('{') {
            Ok(serde_json::from_str(line)?)
        } else {
            Ok(Command::Search(SearchQuery::new(line)))
        }
    }
}

/// One line of output
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Output {
    Search { page: SearchPage },
    Suggest { suggestions: Suggestions },
    Login { accepted: bool },
    Error { input: String, message: String },
}

struct Gateway {
    executor: Executor,
    throttle: LoginThrottle,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    async fn handle(&self, cancel: &CancellationToken, line: String) -> Output {
        match self.dispatch(cancel, &line).await {
            Ok(output) => output,
            Err(e) => {
                warn!(input = %line, error = %e, "Command failed");
                Output::Error {
                    input: line,
                    message: e.public_message().to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, cancel: &CancellationToken, line: &str) -> Result<Output> {
        match Command::parse(line)? {
            Command::Search(query) => {
                let result = self.executor.execute_query(cancel, &query).await;
                self.metrics.record_query(result.is_ok());
                Ok(Output::Search { page: result? })
            }
            Command::Suggest { text } => Ok(Output::Suggest {
                suggestions: self.executor.suggest(cancel, &text).await?,
            }),
            Command::Login {
                ip,
                username,
                success,
            } => {
                let result = self
                    .throttle
                    .attempt(&ip, &username, async move { success })
                    .await;
                if matches!(result, Err(Error::RateLimited)) {
                    self.metrics.record_login_rejection();
                }
                Ok(Output::Login { accepted: result? })
            }
        }
    }

    fn refresh_metrics(&self) {
        self.metrics
            .observe_queue("query", &self.executor.query_queue_metrics());
        self.metrics
            .observe_queue("suggest", &self.executor.suggest_queue_metrics());
        self.metrics
            .observe_cache(self.executor.cached_entries(), &self.executor.cache_stats());
        self.metrics
            .observe_limiter("ip", self.throttle.ip_limiter().tracked_keys());
        self.metrics
            .observe_limiter("username", self.throttle.username_limiter().tracked_keys());
    }

    async fn shutdown(&self, grace: Duration) -> Result<()> {
        let result = self.executor.shutdown(grace).await;
        self.throttle.shutdown().await;
        self.refresh_metrics();
        result
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.resolve_config()?;

    info!("Starting Searchgate");
    info!(
        "  Query queue: {} workers, buffer {}",
        config.executor.query_queue.worker_count, config.executor.query_queue.buffer_size
    );
    info!("  Cache TTL: {:?}", config.executor.cache_ttl);
    info!("  Shutdown grace: {:?}", config.shutdown_grace);

    let backend = build_backend(&config.backend)?;
    info!("  Backend: {}", backend.name());

    let gateway = Arc::new(Gateway {
        executor: QueryExecutor::new(backend, config.executor.clone()),
        throttle: LoginThrottle::new(config.login.ip, config.login.username),
        metrics: Arc::new(GatewayMetrics::global()?.clone()),
    });

    // Start metrics/health server
    let health = Arc::new(HealthState::new());
    let server_cancel = CancellationToken::new();
    let server = if config.server.enabled {
        let listener = metrics::bind(&config.server.metrics_addr).await?;
        let metrics = gateway.metrics.clone();
        let health = health.clone();
        let cancel = server_cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = metrics::serve(listener, metrics, health, cancel).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let refresher = {
        let gateway = gateway.clone();
        BackgroundTask::spawn("metrics-refresh", move |cancel| async move {
            let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => gateway.refresh_metrics(),
                }
            }
        })
    };

    health.set_ready(true);

    let interrupted = run_input_loop(gateway.clone()).await;
    health.set_ready(false);

    info!(interrupted, "Input finished, shutting down");
    refresher.shutdown().await;
    let result = gateway.shutdown(config.shutdown_grace).await;

    server_cancel.cancel();
    if let Some(server) = server {
        if let Err(e) = server.await {
            warn!("Metrics server task ended abnormally: {}", e);
        }
    }

    match &result {
        Ok(()) => info!("Searchgate shutdown complete"),
        Err(e) => error!("Shutdown incomplete: {}", e),
    }
    result
}

/// Read commands until end of input or Ctrl-C. Returns whether interrupted.
async fn run_input_loop(gateway: Arc<Gateway>) -> bool {
    let cancel = CancellationToken::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inflight = JoinSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let interrupted = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C");
                break true;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let gateway = gateway.clone();
                    let cancel = cancel.clone();
                    inflight.spawn(async move {
                        let output = gateway.handle(&cancel, line).await;
                        emit(&output);
                    });
                }
                Ok(None) => {
                    debug!("End of input");
                    break false;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break false;
                }
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    error!("Command task failed: {}", e);
                }
            }
        }
    };

    // Interrupted callers stop waiting; otherwise let every command finish.
    if interrupted {
        cancel.cancel();
    }
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            error!("Command task failed: {}", e);
        }
    }
    interrupted
}

fn emit(output: &Output) {
    match serde_json::to_string(output) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}

fn build_backend(config: &BackendConfig) -> Result<Arc<dyn SearchBackend>> {
    match config {
        BackendConfig::InMemory { corpus, latency_ms } => {
            let backend = match corpus {
                Some(path) => InMemoryBackend::from_json_file(path)?,
                None => {
                    warn!("No corpus configured, serving an empty index");
                    InMemoryBackend::default()
                }
            };
            Ok(Arc::new(
                backend.with_latency(Duration::from_millis(*latency_ms)),
            ))
        }
        BackendConfig::Http(http) => Ok(Arc::new(HttpBackend::new(http.clone())?)),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout carries results; logs go to stderr.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use searchgate::search::Document;

    fn gateway() -> Gateway {
        let backend: Arc<dyn SearchBackend> = Arc::new(InMemoryBackend::new(vec![Document {
            id: "1".into(),
            title: "Water Governance".into(),
            ..Default::default()
        }]));
        Gateway {
            executor: QueryExecutor::new(backend, Default::default()),
            throttle: LoginThrottle::with_defaults(),
            metrics: Arc::new(GatewayMetrics::new().unwrap()),
        }
    }

    #[test]
    fn test_parse_plain_line_is_search() {
        let command = Command::parse("  Water rights ").unwrap();
        assert_matches!(command, Command::Search(q) if q.text == "Water rights" && q.page == 1);
    }

    #[test]
    fn test_parse_json_commands() {
        let command =
            Command::parse(r#"{"op":"search","text":"water","page":3,"filters":{"source":["UN"]}}"#)
                .unwrap();
        assert_matches!(command, Command::Search(q) if q.page == 3 && q.filters.len() == 1);

        let command = Command::parse(r#"{"op":"suggest","text":"wa"}"#).unwrap();
        assert_matches!(command, Command::Suggest { text } if text == "wa");

        let command =
            Command::parse(r#"{"op":"login","ip":"1.2.3.4","username":"u","success":true}"#)
                .unwrap();
        assert_matches!(command, Command::Login { success: true, .. });

        assert_matches!(Command::parse(r#"{"op":"drop"}"#), Err(Error::Json(_)));
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "searchgate",
            "--workers",
            "7",
            "--buffer",
            "0",
            "--backend-url",
            "http://search.local",
            "--no-metrics-server",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.executor.query_queue.worker_count, 7);
        assert_eq!(config.executor.query_queue.buffer_size, 0);
        assert_matches!(config.backend, BackendConfig::Http(ref http) if http.base_url == "http://search.local");
        assert!(!config.server.enabled);
    }

    #[tokio::test]
    async fn test_handle_search_and_errors() {
        let gateway = gateway();
        let cancel = CancellationToken::new();

        let output = gateway.handle(&cancel, "water".to_string()).await;
        assert_matches!(output, Output::Search { ref page } if page.total_count == 1);

        let output = gateway.handle(&cancel, r#"{"op":"search","text":" "}"#.to_string()).await;
        assert_matches!(output, Output::Error { ref message, .. } if message == searchgate::error::SEARCH_FAILED_MESSAGE);

        let json = serde_json::to_string(&gateway.handle(&cancel, "water".to_string()).await).unwrap();
        assert!(json.starts_with(r#"{"op":"search""#));
        assert!(json.contains(r#""from_cache":true"#));

        gateway.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_login_throttled() {
        let gateway = gateway();
        let cancel = CancellationToken::new();
        let login = r#"{"op":"login","ip":"1.1.1.1","username":"mallory","success":false}"#;

        for _ in 0..5 {
            let output = gateway.handle(&cancel, login.to_string()).await;
            assert_matches!(output, Output::Login { accepted: false });
        }
        let output = gateway.handle(&cancel, login.to_string()).await;
        assert_matches!(output, Output::Error { ref message, .. } if message == searchgate::error::TOO_MANY_ATTEMPTS_MESSAGE);

        gateway.shutdown(Duration::from_secs(1)).await.unwrap();
    }
}
