use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use kinetic_monitor::kinetic::config::MonitorConfig;
use kinetic_monitor::kinetic::graph::{layout_with, GraphLoader, Orientation};
use kinetic_monitor::kinetic::run::{RunEngine, RunStatus};
use kinetic_monitor::kinetic::server;
use kinetic_monitor::kinetic::transport::{
    decode_capture, HttpEventSource, ReconnectPolicy, StreamItem, Subscription,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lay out a graph definition and print it as JSON
    Layout {
        /// Path to the graph definition (.yaml, .yml or .json)
        #[arg(short, long)]
        file: PathBuf,

        /// horizontal or vertical
        #[arg(short, long, default_value = "horizontal")]
        orientation: Orientation,
    },
    /// Feed a captured event stream through the engine and print the final state
    Replay {
        /// Capture file, one JSON event (or SSE data line) per line
        #[arg(short, long)]
        file: PathBuf,

        /// Graph definition, to report back-edges and unvisited nodes
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },
    /// Follow a live SSE stream until it ends
    Watch {
        /// Stream endpoint
        #[arg(short, long)]
        url: String,

        /// Connection attempts before giving up
        #[arg(long, default_value_t = 5)]
        retries: u32,
    },
    /// Start the HTTP server
    Serve {
        /// Overrides the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    match &args.command {
        Commands::Serve { .. } => tracing_subscriber::fmt::init(),
        _ => env_logger::init(),
    }

    let mut config = MonitorConfig::load(args.config.as_deref()).context("Failed to load config")?;

    match args.command {
        Commands::Layout { file, orientation } => {
            let graph = GraphLoader::new()
                .load_graph(&file)
                .with_context(|| format!("Failed to load graph {}", file.display()))?;
            let result = layout_with(&graph, orientation, &config.layout);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Replay { file, graph } => {
            let capture = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read capture {}", file.display()))?;

            // reported times come only from the capture
            config.engine.stamp_untimed_events = false;
            let mut engine = RunEngine::new(config.engine.clone());
            let mut applied = 0;
            for item in decode_capture(&capture) {
                match item {
                    StreamItem::Event(value) => {
                        if engine.apply_raw(&value).changed_state() {
                            applied += 1;
                        }
                    }
                    StreamItem::Done => break,
                }
            }
            log::info!("Applied {} events from {}", applied, file.display());

            let state = engine.into_state();
            let mut report = json!({ "state": state });

            if let Some(graph_path) = graph {
                let graph = GraphLoader::new()
                    .load_graph(&graph_path)
                    .with_context(|| format!("Failed to load graph {}", graph_path.display()))?;
                let layout = layout_with(&graph, Orientation::default(), &config.layout);

                let back_edges: Vec<_> = layout
                    .edges
                    .iter()
                    .filter(|e| e.is_back_edge)
                    .map(|e| format!("{}->{}", e.from, e.to))
                    .collect();
                let unvisited: Vec<_> = layout
                    .nodes
                    .keys()
                    .filter(|id| state.node(id).is_none())
                    .cloned()
                    .collect();
                report["backEdges"] = json!(back_edges);
                report["unvisited"] = json!(unvisited);
            }

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Watch { url, retries } => {
            let source = HttpEventSource::new(&url).with_context(|| format!("Invalid URL {}", url))?;
            let mut subscription = Subscription::new(source, RunEngine::new(config.engine.clone()));
            let policy = ReconnectPolicy {
                max_attempts: retries.max(1),
                delay: Duration::from_secs(2),
            };

            let mut last_status = RunStatus::Idle;
            let mut last_node: Option<String> = None;
            subscription
                .run_with_reconnect(policy, |state, _| {
                    if state.status != last_status {
                        log::info!("Run status: {:?}", state.status);
                        last_status = state.status;
                    }
                    if state.current_node_id != last_node {
                        if let Some(node) = &state.current_node_id {
                            log::info!("Current node: {}", node);
                        }
                        last_node = state.current_node_id.clone();
                    }
                })
                .await
                .with_context(|| format!("Stream {} failed", url))?;

            let state = subscription.into_engine().into_state();
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            server::serve(config).await.context("Server failed")?;
        }
    }

    Ok(())
}
