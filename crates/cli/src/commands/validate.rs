use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use serde::Serialize;

use tracewarden_engine::{EngineConfig, RuleCompiler};
use tracewarden_rules::{LintLevel, RuleDefinition, RuleError};
use tracewarden_rules_dsl::DslFrontend;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Rule file (YAML).
    pub rules: PathBuf,
    /// Engine config (TOML) whose rule limits apply.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Treat lint warnings as failures.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
struct Diagnostic {
    id: String,
    ok: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

pub fn run(args: &ValidateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&args.rules)
        .with_context(|| format!("cannot read {}", args.rules.display()))?;
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let compiler = RuleCompiler::new(config.rules.clone());
    let definitions = DslFrontend::read_unchecked(&content)?;

    let mut diagnostics: Vec<Diagnostic> = definitions
        .into_iter()
        .map(|def| check(&compiler, def, args.strict))
        .collect();
    if let Err(e) = config.rules.check_rule_count(diagnostics.len()) {
        diagnostics.push(Diagnostic {
            id: "<file>".into(),
            ok: false,
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diagnostics)?),
        OutputFormat::Text => print_text(&diagnostics),
    }

    let failed = diagnostics.iter().filter(|d| !d.ok).count();
    if failed > 0 {
        bail!("{failed} of {} rule(s) failed validation", diagnostics.len());
    }
    Ok(())
}

fn check(compiler: &RuleCompiler, def: RuleDefinition, strict: bool) -> Diagnostic {
    let id = def.id.to_string();
    let source = def.expression.clone();
    let mut diagnostic = Diagnostic {
        id,
        ok: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    match compiler.compile(def) {
        Ok(compiled) => {
            for lint in compiled.lints {
                if lint.level == LintLevel::Error || strict {
                    diagnostic.errors.push(lint.to_string());
                } else {
                    diagnostic.warnings.push(lint.to_string());
                }
            }
        }
        Err(RuleError::Parse(p)) => diagnostic.errors.push(p.render(&source)),
        Err(e) => diagnostic.errors.push(e.to_string()),
    }
    diagnostic.ok = diagnostic.errors.is_empty();
    diagnostic
}

fn print_text(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        let status = if d.ok { "ok  " } else { "FAIL" };
        println!("[{status}] {}", d.id);
        for e in &d.errors {
            for line in e.lines() {
                println!("    {line}");
            }
        }
        for w in &d.warnings {
            println!("    {w}");
        }
    }
    let ok = diagnostics.iter().filter(|d| d.ok).count();
    println!("{ok}/{} rule(s) valid", diagnostics.len());
}
