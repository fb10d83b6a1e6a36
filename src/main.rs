mod checker;
mod config;
mod dataflow;
mod diagnostics;
mod engine;
mod fieldinit;
mod generics;
mod ir;
mod lattice;
mod libmodel;
mod oracle;
mod scope;
mod telemetry;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Invocation, PropertyBag, Run, Sarif, Tool, ToolComponent, SCHEMA_URL,
};

use crate::config::Config;
use crate::dataflow::AssignScanOracle;
use crate::engine::{CheckSession, EngineOutput};
use crate::ir::Program;
use crate::libmodel::LibraryModels;
use crate::telemetry::{init_logging, Telemetry};

/// CLI arguments for nullspect execution.
#[derive(Parser, Debug)]
#[command(
    name = "nullspect",
    about = "Static nullability checking for resolved programs, with SARIF output.",
    version
)]
struct Cli {
    /// Resolved-program JSON document produced by the host compiler.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Library annotation model JSON.
    #[arg(long, value_name = "PATH")]
    library_model: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP HTTP endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otlp_endpoint: Option<String>,

    /// Packages checked even without explicit markers.
    #[arg(long, value_name = "PKG", value_delimiter = ',')]
    annotated_packages: Vec<String>,
    /// Carve-outs inside annotated packages.
    #[arg(long, value_name = "PKG", value_delimiter = ',')]
    unannotated_subpackages: Vec<String>,
    /// Qualified class names never treated as annotated.
    #[arg(long, value_name = "CLASS", value_delimiter = ',')]
    excluded_classes: Vec<String>,
    /// Annotations forcing a class out of the checked scope.
    #[arg(long, value_name = "ANNOTATION", value_delimiter = ',')]
    excluded_class_annotations: Vec<String>,
    /// Qualified method names treated as initializers.
    #[arg(long, value_name = "METHOD", value_delimiter = ',')]
    known_initializers: Vec<String>,
    /// Annotations marking initializer methods.
    #[arg(long, value_name = "ANNOTATION", value_delimiter = ',')]
    custom_initializer_annotations: Vec<String>,
    /// Field annotations exempting fields from initialization checking.
    #[arg(long, value_name = "ANNOTATION", value_delimiter = ',')]
    excluded_field_annotations: Vec<String>,
    /// Class annotations marking externally initialized classes.
    #[arg(long, value_name = "ANNOTATION", value_delimiter = ',')]
    external_init_annotations: Vec<String>,
    /// Skip override lookup unless the method is marked overriding.
    #[arg(long)]
    exhaustive_override: bool,
    /// Attach suppression-insertion fixes to diagnostics.
    #[arg(long)]
    suggest_suppressions: bool,
    /// Include unannotated-scope instantiations in generics comparison.
    #[arg(long)]
    strict_generics: bool,
    /// Qualified name of the runtime-checked cast helper.
    #[arg(long, value_name = "METHOD")]
    cast_to_non_null_method: Option<String>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }

    let telemetry = match &cli.otlp_endpoint {
        Some(endpoint) => Some(Arc::new(Telemetry::new(endpoint.clone())?)),
        None => None,
    };

    let started_at = Instant::now();
    let load_started_at = Instant::now();
    let program = load_program(&cli.input)?;
    program
        .validate()
        .context("resolved-program document is inconsistent")?;
    let models = match &cli.library_model {
        Some(path) => LibraryModels::load(path)?,
        None => LibraryModels::default(),
    };
    let load_duration_ms = load_started_at.elapsed().as_millis();

    let config = build_config(&cli);
    let flow = AssignScanOracle;
    let session = CheckSession::new(&program, &config, &models, &flow, telemetry.clone());
    session.run();
    let output = session.into_output();

    let stats = InvocationStats {
        load_duration_ms,
        unit_count: program.units.len(),
        class_count: program.classes.len(),
        result_count: output.results.len(),
        unit_failure_count: output.unit_failures.len(),
    };
    let invocation = build_invocation(&stats, &output);
    let sarif = build_sarif(invocation, output);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} load_ms={} units={} classes={} results={}",
            started_at.elapsed().as_millis(),
            stats.load_duration_ms,
            stats.unit_count,
            stats.class_count,
            stats.result_count
        );
    }
    if let Some(telemetry) = telemetry {
        telemetry.shutdown()?;
    }

    Ok(())
}

fn load_program(path: &Path) -> Result<Program> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
    let program: Program = serde_path_to_error::deserialize(&mut deserializer)
        .with_context(|| format!("failed to parse resolved program {}", path.display()))?;
    Ok(program)
}

fn build_config(cli: &Cli) -> Config {
    Config {
        annotated_packages: cli.annotated_packages.clone(),
        unannotated_subpackages: cli.unannotated_subpackages.clone(),
        excluded_classes: cli.excluded_classes.iter().cloned().collect(),
        excluded_class_annotations: cli.excluded_class_annotations.iter().cloned().collect(),
        known_initializers: cli.known_initializers.iter().cloned().collect(),
        custom_initializer_annotations: cli
            .custom_initializer_annotations
            .iter()
            .cloned()
            .collect(),
        excluded_field_annotations: cli.excluded_field_annotations.iter().cloned().collect(),
        external_init_annotations: cli.external_init_annotations.iter().cloned().collect(),
        exhaustive_override: cli.exhaustive_override,
        suggest_suppressions: cli.suggest_suppressions,
        strict_generics: cli.strict_generics,
        cast_to_non_null_method: cli.cast_to_non_null_method.clone(),
        ..Config::default()
    }
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

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    load_duration_ms: u128,
    unit_count: usize,
    class_count: usize,
    result_count: usize,
    unit_failure_count: usize,
}

fn build_invocation(stats: &InvocationStats, output: &EngineOutput) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "nullspect.load_ms".to_string(),
        json!(stats.load_duration_ms),
    );
    properties.insert("nullspect.unit_count".to_string(), json!(stats.unit_count));
    properties.insert(
        "nullspect.class_count".to_string(),
        json!(stats.class_count),
    );
    properties.insert(
        "nullspect.result_count".to_string(),
        json!(stats.result_count),
    );
    properties.insert(
        "nullspect.unit_failures".to_string(),
        json!(output
            .unit_failures
            .iter()
            .map(|failure| format!("{}: {}", failure.unit_path, failure.message))
            .collect::<Vec<_>>()),
    );

    Invocation::builder()
        .execution_successful(stats.unit_failure_count == 0)
        .arguments(arguments)
        .command_line(command_line)
        .properties(
            PropertyBag::builder()
                .additional_properties(properties)
                .build(),
        )
        .build()
}

fn build_sarif(invocation: Invocation, output: EngineOutput) -> Sarif {
    let driver = if output.rules.is_empty() {
        ToolComponent::builder()
            .name("nullspect")
            .information_uri("https://github.com/exoego/nullspect")
            .build()
    } else {
        ToolComponent::builder()
            .name("nullspect")
            .information_uri("https://github.com/exoego/nullspect")
            .rules(output.rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(output.results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
