//! # Prerender CLI Entry Point
//!
//! Renders a script through a pool of isolated JavaScript workers.
//!
//! ## Usage
//!
//! ```bash
//! # Render once, printing the output to stdout
//! prerender render -s app.js -p blah
//!
//! # Pass structured params instead of a string
//! prerender render -s app.js -p '{"things": ["apple"]}' --json
//!
//! # Re-render every second, picking up edits to app.js
//! prerender watch -s app.js -p blah --interval-ms 1000
//! ```
//!
//! Scripts can call `log(...)` to write through the CLI's logger.

use anyhow::{Context as _, Result};
use argh::FromArgs;
use prerender_runtime::{CallbackRegistry, RenderContext, Renderer, RendererConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// Prerender - render JavaScript through a pool of isolated workers
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Render**: render once and print the output
/// - **Watch**: render on an interval, reloading the script when it changes
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Render(RenderArgs),
    Watch(WatchArgs),
}

/// Arguments for a single render.
///
/// # Example
///
/// ```bash
/// prerender render -s app.js -p blah --entry "main(params)"
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "render")]
/// render a script once and print the result
struct RenderArgs {
    /// path to the JavaScript file to render
    #[argh(option, short = 's')]
    script: String,

    /// params passed to the script as the `params` global
    #[argh(option, short = 'p', default = "String::new()")]
    params: String,

    /// parse params as JSON before binding them
    #[argh(switch)]
    json: bool,

    /// expression evaluated to produce the output
    #[argh(option)]
    entry: Option<String>,

    /// number of worker threads
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// JSON file holding a renderer configuration
    ///
    /// Command-line flags override values from the file.
    #[argh(option, long = "config")]
    config: Option<String>,

    /// give up on the render after this many milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

/// Arguments for watch mode.
///
/// The script is re-read whenever its size or modification time changes.
#[derive(FromArgs)]
#[argh(subcommand, name = "watch")]
/// re-render a script on an interval, reloading it on change
struct WatchArgs {
    /// path to the JavaScript file to render
    #[argh(option, short = 's')]
    script: String,

    /// params passed to the script as the `params` global
    #[argh(option, short = 'p', default = "String::new()")]
    params: String,

    /// parse params as JSON before binding them
    #[argh(switch)]
    json: bool,

    /// expression evaluated to produce the output
    #[argh(option)]
    entry: Option<String>,

    /// milliseconds between renders
    #[argh(option, long = "interval-ms", default = "1000")]
    interval_ms: u64,

    /// stop after this many renders
    #[argh(option, long = "count")]
    count: Option<u64>,
}

/// Load a configuration file, or the defaults when none is given.
fn load_config(path: Option<&str>) -> Result<RendererConfig> {
    let Some(path) = path else {
        return Ok(RendererConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    RendererConfig::from_json(&text).with_context(|| format!("Invalid config file '{}'", path))
}

fn parse_params(raw: &str, json: bool) -> Result<Value> {
    if json {
        serde_json::from_str(raw).context("Params are not valid JSON")
    } else {
        Ok(Value::String(raw.to_string()))
    }
}

fn script_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| prerender_runtime::config::DEFAULT_SCRIPT_NAME.to_string())
}

/// Host functions every CLI render gets.
fn cli_callbacks() -> CallbackRegistry {
    CallbackRegistry::new().register("log", |ctx, args| {
        let message = (0..args.len())
            .filter_map(|i| args.string(i))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(request_id = ctx.id(), "{}", message);
        Value::Null
    })
}

async fn run_render(args: RenderArgs) -> Result<()> {
    let path = PathBuf::from(&args.script);
    let mut config = load_config(args.config.as_deref())?.with_script_name(script_name(&path));
    if let Some(entry) = args.entry {
        config = config.with_entry(entry);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    let params = parse_params(&args.params, args.json)?;
    let renderer = Arc::new(Renderer::from_file(&path, config, cli_callbacks())?);

    let mut context = RenderContext::new();
    if let Some(ms) = args.timeout_ms {
        context = context.with_timeout(Duration::from_millis(ms));
    }

    let result = Arc::clone(&renderer).render_async(context, params).await?;
    renderer.shutdown();

    let output = result.into_result()?;
    println!("{}", output);
    Ok(())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let path = PathBuf::from(&args.script);
    let mut config = RendererConfig::new()
        .with_script_name(script_name(&path))
        .with_reload_on_change(&path);
    if let Some(entry) = args.entry {
        config = config.with_entry(entry);
    }

    let params = parse_params(&args.params, args.json)?;
    let renderer = Arc::new(Renderer::from_file(&path, config, cli_callbacks())?);
    tracing::info!("Watching {} every {}ms", path.display(), args.interval_ms);

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut last_output: Option<String> = None;
    let mut renders = 0u64;

    while args.count.is_none_or(|count| renders < count) {
        interval.tick().await;
        renders += 1;

        let rendered = Arc::clone(&renderer)
            .render_async(RenderContext::new(), params.clone())
            .await
            .and_then(|result| result.into_result());

        match rendered {
            Ok(output) => {
                if last_output.as_deref() != Some(output.as_str()) {
                    println!("{}", output);
                    last_output = Some(output);
                }
            }
            Err(e) if e.is_per_request() => {
                tracing::warn!(generation = renderer.generation(), "Render failed: {}", e)
            }
            // A broken reload leaves no pool; keep polling so a fix is picked up
            Err(e) => tracing::error!("Renderer unavailable: {}", e),
        }
    }

    let stats = renderer.stats();
    tracing::info!(
        generation = stats.generation,
        renders = stats.renders,
        failures = stats.failures,
        reloads = stats.reloads,
        "Watch finished"
    );
    renderer.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, but allow RUST_LOG to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render(args) => run_render(args).await,
        Commands::Watch(args) => run_watch(args).await,
    }
}
