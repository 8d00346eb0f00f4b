mod report;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use linkgraph::config::CallGraphConfig;
use linkgraph::graph::{CallGraph, MethodRef, ScanState};
use linkgraph::logging::init_tracing;
use linkgraph::scan::scan_inputs;

use crate::report::{edge_results, rule_descriptors, unresolved_results};

/// CLI arguments for linkgraph execution.
#[derive(Parser, Debug)]
#[command(
    name = "linkgraph",
    about = "Builds the method call graph of JVM class files and JAR files and reports it as SARIF.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Report call edges of a method, written as `owner.name(descriptor)return`.
    #[arg(long = "method", value_name = "METHOD")]
    methods: Vec<String>,
    /// Do not turn lambda call sites into calls to the lambda body.
    #[arg(long)]
    no_lambdas: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.quiet {
        init_tracing();
    }
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let methods = cli
        .methods
        .iter()
        .map(|method| method.parse::<MethodRef>())
        .collect::<Result<Vec<_>, _>>()?;

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let artifact_count = scan.artifacts.len();
    let scanned_at = Instant::now();

    let config = CallGraphConfig {
        unwrap_lambdas: !cli.no_lambdas,
        ..CallGraphConfig::default()
    };
    let graph = CallGraph::new(Arc::new(scan.workspace), config);
    graph.initialize()?;
    if graph.wait_for_scan() == ScanState::Failed {
        anyhow::bail!("call graph construction failed");
    }

    let mut results = unresolved_results(&graph);
    for method in &methods {
        results.extend(edge_results(&graph, method)?);
    }
    let stats = graph.stats();

    let invocation = build_invocation();
    let sarif = build_sarif(scan.artifacts, results, invocation);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} load_ms={} graph_ms={} classes={} artifacts={} vertices={} edges={} unresolved={}",
            started_at.elapsed().as_millis(),
            scanned_at.duration_since(started_at).as_millis(),
            scanned_at.elapsed().as_millis(),
            scan.class_count,
            artifact_count,
            stats.vertices,
            stats.edges,
            stats.unresolved_declarations
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    results: Vec<SarifResult>,
    invocation: Invocation,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("linkgraph")
        .rules(rule_descriptors())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
