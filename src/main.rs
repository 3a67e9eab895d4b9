//! Stencil CLI
//!
//! Usage:
//!   stencil [OPTIONS] [FILE]
//!
//! Options:
//!   --resolve <KIND:NAME>      Print the resolved members of a template
//!   --specialize <KIND:NAME>   Print the instance produced by a custom
//!   --instantiate <KIND:NAME>  Print the instance produced by a template
//!   --instance <NAME>          Instance name for --specialize/--instantiate
//!   --param <KEY=VALUE>        Parameter binding (repeatable)
//!   --validate <SCOPE:NAME>    Check a usage against the constraint rules
//!   --attr <KEY=VALUE>         Attribute of the validated usage (repeatable)
//!   --list                     List definitions and constraint rules
//!   -c, --config <FILE>        Engine configuration (TOML, `[engine]` table)
//!   -d, --debug                Enable debug logging
//!   -h, --help                 Print help

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stencil::{
    Bindings, ConstraintScope, DefinitionClass, DefinitionKind, Engine, EngineConfig, Instance,
    ParamValue, Target,
};

#[derive(Parser, Debug)]
#[command(name = "stencil")]
#[command(about = "Resolve templates, specialize customs and check constraints")]
struct Cli {
    /// Declaration manifest (reads from stdin if not provided)
    input: Option<PathBuf>,

    /// Print the resolved members of a template, e.g. `style:Theme`
    #[arg(long, value_name = "KIND:NAME")]
    resolve: Option<String>,

    /// Print the instance produced by a custom, e.g. `style:Primary`
    #[arg(long, value_name = "KIND:NAME")]
    specialize: Option<String>,

    /// Print the instance produced by a template
    #[arg(long, value_name = "KIND:NAME")]
    instantiate: Option<String>,

    /// Instance name for --specialize and --instantiate
    #[arg(long, value_name = "NAME", default_value = "instance")]
    instance: String,

    /// Parameter binding; `[a, b]` binds a list
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Check a usage against the constraint rules, e.g. `element:span`
    #[arg(long, value_name = "SCOPE:NAME")]
    validate: Option<String>,

    /// Attribute of the validated usage
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    attrs: Vec<String>,

    /// List definitions and constraint rules
    #[arg(long)]
    list: bool,

    /// Engine configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Initialize the tracing subscriber; `--debug` wins over `RUST_LOG`
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("stencil=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stencil=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    tracing::debug!("stencil starting with args: {:?}", cli);

    match run(&cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, String> {
    let config = match &cli.config {
        Some(path) => Some(EngineConfig::from_file(path).map_err(|e| {
            format!("Error loading config '{}': {}", path.display(), e)
        })?),
        None => None,
    };

    let (source, filename) = read_input(cli.input.as_ref())?;
    let engine = Engine::from_manifest(&source, config).map_err(|e| e.format(&source, &filename))?;

    for problem in engine.check_references() {
        tracing::warn!(definition = problem.subject(), "{}", problem);
    }

    let bindings = parse_bindings(&cli.params)?;
    let mut exit = ExitCode::SUCCESS;

    if cli.list {
        print_listing(&engine);
    }

    if let Some(spec) = &cli.resolve {
        let (kind, name) = parse_kind_name(spec)?;
        let members = engine
            .resolve(kind, name)
            .map_err(|e| format!("Error: {}", e))?;
        for member in members.iter() {
            println!("{}", member);
        }
    }

    if let Some(spec) = &cli.instantiate {
        let (kind, name) = parse_kind_name(spec)?;
        let instance = engine
            .instantiate(kind, name, &cli.instance, &bindings)
            .map_err(|e| format!("Error: {}", e))?;
        print_instance(&instance);
    }

    if let Some(spec) = &cli.specialize {
        let (kind, name) = parse_kind_name(spec)?;
        let instance = engine
            .specialize(kind, name, &cli.instance, &bindings)
            .map_err(|e| format!("Error: {}", e))?;
        print_instance(&instance);
    }

    if let Some(spec) = &cli.validate {
        let (scope, name) = spec
            .split_once(':')
            .and_then(|(scope, name)| Some((ConstraintScope::from_keyword(scope)?, name)))
            .ok_or_else(|| format!("Error: expected SCOPE:NAME, got '{}'", spec))?;
        let mut target = Target::new(scope, name);
        for (key, value) in parse_pairs(&cli.attrs)? {
            target = target.with_attribute(key, value);
        }
        match engine.check(&target) {
            Ok(violations) if violations.is_empty() => println!("ok"),
            Ok(violations) => {
                for violation in &violations {
                    println!("{} ({})", violation, violation.suggestion());
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                exit = ExitCode::from(1);
            }
        }
    }

    Ok(exit)
}

fn read_input(path: Option<&PathBuf>) -> Result<(String, String), String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .map(|content| (content, path.display().to_string()))
            .map_err(|e| format!("Error reading file '{}': {}", path.display(), e)),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| format!("Error reading from stdin: {}", e))?;
            Ok((buffer, "<stdin>".to_string()))
        }
    }
}

fn parse_kind_name(spec: &str) -> Result<(DefinitionKind, &str), String> {
    spec.split_once(':')
        .and_then(|(kind, name)| Some((DefinitionKind::from_keyword(kind)?, name)))
        .ok_or_else(|| format!("Error: expected KIND:NAME (style, element or var), got '{}'", spec))
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(&str, &str)>, String> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| format!("Error: expected KEY=VALUE, got '{}'", pair))
        })
        .collect()
}

fn parse_bindings(params: &[String]) -> Result<Bindings, String> {
    let mut bindings = Bindings::new();
    for (key, value) in parse_pairs(params)? {
        let value = match value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            Some(items) => ParamValue::List(
                items
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
            ),
            None => ParamValue::str(value),
        };
        bindings.insert(key.to_string(), value);
    }
    Ok(bindings)
}

fn print_instance(instance: &Instance) {
    println!("{} ({})", instance.name, instance.source);
    for member in &instance.members {
        println!("  {}", member);
    }
}

fn print_listing(engine: &Engine) {
    engine.with_registry(|registry| {
        for class in [DefinitionClass::Template, DefinitionClass::Custom] {
            for kind in DefinitionKind::ALL {
                for name in registry.names(class, kind) {
                    println!("{} {} {}", class, kind.keyword(), name);
                }
            }
        }
        let graph: BTreeMap<String, Vec<String>> = registry.dependency_graph();
        for (parent, children) in &graph {
            println!("{} <- {}", parent, children.join(", "));
        }
        print!("{}", registry.constraints().export());
    });
}
