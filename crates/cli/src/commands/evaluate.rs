use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use tracewarden_core::{Span, TenantId};
use tracewarden_engine::{Engine, EngineConfig, FiringResult};
use tracewarden_rules::RuleFrontend;
use tracewarden_rules_dsl::DslFrontend;
use tracewarden_violations::Violation;
use tracewarden_violations_memory::MemoryViolationSink;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Rule file (YAML).
    #[arg(long)]
    pub rules: PathBuf,
    /// Span file: a JSON array of spans.
    #[arg(long)]
    pub spans: PathBuf,
    /// Tenant whose session evaluates the spans.
    #[arg(long, env = "TRACEWARDEN_TENANT")]
    pub tenant: String,
    /// Engine config (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    tenant: &'a str,
    rules_evaluated: usize,
    traces_evaluated: usize,
    elapsed_ms: u128,
    violations: &'a [Violation],
}

pub async fn run(args: &EvaluateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let definitions = DslFrontend.parse_file(&args.rules)?;
    let content = std::fs::read_to_string(&args.spans)
        .with_context(|| format!("cannot read {}", args.spans.display()))?;
    let spans: Vec<Span> = serde_json::from_str(&content)
        .with_context(|| format!("invalid span file {}", args.spans.display()))?;

    let tenant = TenantId::new(args.tenant.as_str());
    let sink = Arc::new(MemoryViolationSink::new());
    let engine = Engine::builder().config(config).sink(sink).build()?;

    let deployed = engine.deploy_rules(&tenant, definitions)?;
    for (rule, lint) in &deployed.lints {
        eprintln!("{rule}: {lint}");
    }
    let result = engine.insert_batch(&tenant, spans).await?;

    match format {
        OutputFormat::Json => {
            let report = Report {
                tenant: tenant.as_str(),
                rules_evaluated: result.rules_evaluated,
                traces_evaluated: result.traces_evaluated,
                elapsed_ms: result.elapsed.as_millis(),
                violations: &result.violations,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_text(&tenant, &result),
    }
    Ok(())
}

fn print_text(tenant: &TenantId, result: &FiringResult) {
    println!(
        "{} violation(s) for tenant {tenant} ({} trace(s), {} rule(s), {}ms)",
        result.violations.len(),
        result.traces_evaluated,
        result.rules_evaluated,
        result.elapsed.as_millis()
    );
    for v in &result.violations {
        let spans: Vec<&str> = v.span_refs().iter().map(|r| r.span_id.as_str()).collect();
        println!(
            "  [{}] {} trace={} spans={}",
            v.severity(),
            v.rule_id(),
            v.primary_trace_id(),
            spans.join(",")
        );
        println!("         {}", v.message());
    }
}
