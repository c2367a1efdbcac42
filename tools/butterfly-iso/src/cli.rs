//! CLI commands for butterfly-iso

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing::{info, warn};

use butterfly_iso::config::EngineConfig;
use butterfly_iso::graph::MemoryGraph;
use butterfly_iso::request::IsochroneRequest;
use butterfly_iso::synthetic::SyntheticGrid;

#[derive(Parser)]
#[command(name = "butterfly-iso")]
#[command(about = "Isochrones and isodistances over a road graph", long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log one JSON object per line instead of human-readable text
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute one isochrone request and write GeoJSON
    Isochrone {
        /// Graph file (.json description or bincode snapshot)
        graph: PathBuf,

        /// Request JSON file; read from stdin when omitted
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the GeoJSON
        #[arg(long)]
        pretty: bool,
    },

    /// Compute a JSON array of requests concurrently, one worker per request
    Batch {
        /// Graph file (.json description or bincode snapshot)
        graph: PathBuf,

        /// JSON file holding an array of requests
        input: PathBuf,

        /// Output directory for <index>.geojson files
        #[arg(short, long)]
        outdir: PathBuf,

        /// Worker threads (default: all cores)
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Start the HTTP API with OpenAPI docs
    Serve {
        /// Graph file (.json description or bincode snapshot)
        graph: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Write a synthetic street grid as a bincode snapshot
    Synth {
        /// Output graph file
        output: PathBuf,

        /// Intersections per row
        #[arg(long, default_value = "41")]
        cols: usize,

        /// Intersections per column
        #[arg(long, default_value = "41")]
        rows: usize,

        /// Distance between intersections in meters
        #[arg(long, default_value = "100")]
        spacing: f64,

        /// Longitude of the south-west corner
        #[arg(long, default_value = "5.085")]
        lon: f64,

        /// Latitude of the south-west corner
        #[arg(long, default_value = "52.055")]
        lat: f64,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_graph(path: &Path) -> Result<MemoryGraph> {
    let start = Instant::now();
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let graph = if is_json {
        MemoryGraph::load_json(path)
    } else {
        MemoryGraph::load(path)
    }
    .with_context(|| format!("loading graph {}", path.display()))?;

    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "graph loaded"
    );
    Ok(graph)
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Isochrone {
                graph,
                request,
                output,
                pretty,
            } => {
                let graph = load_graph(&graph)?;
                let text = match &request {
                    Some(path) => std::fs::read_to_string(path)
                        .with_context(|| format!("reading request {}", path.display()))?,
                    None => {
                        let mut text = String::new();
                        std::io::stdin()
                            .read_to_string(&mut text)
                            .context("reading request from stdin")?;
                        text
                    }
                };
                let request = IsochroneRequest::from_json(&text)?;
                let collection = butterfly_iso::isochrone(&graph, &config, &request)?;

                let json = if pretty {
                    serde_json::to_string_pretty(&collection)?
                } else {
                    serde_json::to_string(&collection)?
                };
                match output {
                    Some(path) => std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?,
                    None => println!("{json}"),
                }
                Ok(())
            }
            Commands::Batch {
                graph,
                input,
                outdir,
                threads,
            } => {
                let graph = load_graph(&graph)?;
                let text = std::fs::read_to_string(&input)
                    .with_context(|| format!("reading {}", input.display()))?;
                let requests: Vec<IsochroneRequest> =
                    serde_json::from_str(&text).with_context(|| {
                        format!("{} is not a JSON array of requests", input.display())
                    })?;
                std::fs::create_dir_all(&outdir)
                    .with_context(|| format!("creating {}", outdir.display()))?;

                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads.unwrap_or(0))
                    .build()
                    .context("building worker pool")?;

                let start = Instant::now();
                let outcomes: Vec<Result<()>> = pool.install(|| {
                    requests
                        .par_iter()
                        .enumerate()
                        .map(|(i, request)| {
                            let collection = butterfly_iso::isochrone(&graph, &config, request)
                                .with_context(|| format!("request {i}"))?;
                            let path = outdir.join(format!("{i}.geojson"));
                            std::fs::write(&path, serde_json::to_string(&collection)?)
                                .with_context(|| format!("writing {}", path.display()))?;
                            Ok(())
                        })
                        .collect()
                });

                let mut failed = 0;
                for outcome in &outcomes {
                    if let Err(e) = outcome {
                        failed += 1;
                        warn!(error = %format!("{e:#}"), "batch request failed");
                    }
                }
                info!(
                    requests = outcomes.len(),
                    failed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "batch finished"
                );
                if failed > 0 {
                    anyhow::bail!("{failed} of {} requests failed", outcomes.len());
                }
                Ok(())
            }
            Commands::Serve { graph, port } => {
                let graph = load_graph(&graph)?;
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(butterfly_iso::server::serve(graph, config, port))?;
                Ok(())
            }
            Commands::Synth {
                output,
                cols,
                rows,
                spacing,
                lon,
                lat,
            } => {
                let graph = SyntheticGrid::new(cols, rows, spacing).at(lon, lat).build()?;
                graph
                    .save(&output)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!(
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    path = %output.display(),
                    "synthetic graph written"
                );
                Ok(())
            }
        }
    }
}
