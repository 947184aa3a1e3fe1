#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use af_engine::{Answer, Pipeline, PipelineConfig};
use af_runtime::RuntimeMode;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";
const PROMPT: &str = "askframe> ";

#[derive(Debug, Clone, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    dataset: Option<PathBuf>,
    timeout_ms: Option<u64>,
    max_steps: Option<u64>,
    strict: bool,
    json: bool,
    expr: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("af-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    init_tracing();

    let config = resolve_config(&args)?;
    let pipeline = Pipeline::from_config(&config).map_err(|error| error.to_string())?;
    tracing::info!(
        rows = pipeline.dataset().len(),
        columns = pipeline.dataset().columns().len(),
        "dataset ready"
    );

    if let Some(expr) = args.expr.as_deref() {
        return print_answer(&pipeline.run(expr), args.json);
    }

    let kpis = pipeline.kpis().map_err(|error| error.to_string())?;
    println!("{}", kpis.render_plain());
    repl(&pipeline, args.json)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Config file first, then flags on top of it.
fn resolve_config(args: &CliArgs) -> Result<PipelineConfig, String> {
    let mut config = match args.config.as_deref() {
        Some(path) => PipelineConfig::load(path).map_err(|error| error.to_string())?,
        None => PipelineConfig::default(),
    };
    if let Some(path) = &args.dataset {
        config.dataset_path = Some(path.clone());
    }
    if args.strict {
        config.policy.mode = RuntimeMode::Strict;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.policy = config.policy.with_timeout_ms(Some(timeout_ms));
    }
    if let Some(max_steps) = args.max_steps {
        config.policy = config.policy.with_max_steps(Some(max_steps));
    }
    if config.dataset_path.is_none() {
        return Err("no dataset given: pass --dataset <csv> or a --config with dataset_path".into());
    }
    Ok(config)
}

fn repl(pipeline: &Pipeline, json: bool) -> Result<(), String> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{PROMPT}");
        io::stdout().flush().map_err(|error| error.to_string())?;
        let Some(line) = lines.next() else {
            println!();
            return Ok(());
        };
        let line = line.map_err(|error| error.to_string())?;
        match parse_command(&line) {
            ReplCommand::Skip => {}
            ReplCommand::Quit => return Ok(()),
            ReplCommand::Columns => println!("{}", pipeline.dataset().columns().join(", ")),
            ReplCommand::Kpis => {
                let kpis = pipeline.kpis().map_err(|error| error.to_string())?;
                println!("{}", kpis.render_plain());
            }
            ReplCommand::Prompt(question) => println!("{}", pipeline.prompt(question)),
            ReplCommand::Run(expression) => print_answer(&pipeline.run(expression), json)?,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplCommand<'a> {
    Skip,
    Quit,
    Columns,
    Kpis,
    Prompt(&'a str),
    Run(&'a str),
}

fn parse_command(line: &str) -> ReplCommand<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Skip;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") || line == ":q" {
        return ReplCommand::Quit;
    }
    match line {
        ":columns" => ReplCommand::Columns,
        ":kpis" => ReplCommand::Kpis,
        _ => match line.strip_prefix(":prompt ") {
            Some(question) => ReplCommand::Prompt(question),
            None => ReplCommand::Run(line),
        },
    }
}

fn print_answer(answer: &Answer, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(answer).map_err(|error| error.to_string())?;
        println!("{text}");
    } else {
        if answer.repair_attempted {
            tracing::info!(expression = %answer.expression, "answered after repair");
        }
        println!("{}", answer.reply.render_plain());
    }
    Ok(())
}

fn parse_u64(flag: &str, value: Option<String>) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a number"))?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got {value:?}"))
}

fn parse_args() -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--config requires a path".to_owned())?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--dataset" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--dataset requires a path".to_owned())?;
                parsed.dataset = Some(PathBuf::from(value));
            }
            "--timeout-ms" => {
                parsed.timeout_ms = Some(parse_u64("--timeout-ms", args.next())?);
            }
            "--max-steps" => {
                parsed.max_steps = Some(parse_u64("--max-steps", args.next())?);
            }
            "--expr" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--expr requires an expression".to_owned())?;
                parsed.expr = Some(value);
            }
            "--strict" => {
                parsed.strict = true;
            }
            "--json" => {
                parsed.json = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(parsed)
}

fn print_help() {
    println!(
        "af-cli\n\
         Usage:\n\
         \taf-cli [--config <json>] [--dataset <csv>] [--timeout-ms <n>] [--max-steps <n>] [--strict] [--json] [--expr <expression>]\n\
         Options:\n\
         \t--config <json>       pipeline config (dataset_path, policy, code_map_overrides)\n\
         \t--dataset <csv>       dataset to load; overrides the config\n\
         \t--timeout-ms <n>      wall-clock limit per evaluation\n\
         \t--max-steps <n>       step budget per evaluation\n\
         \t--strict              report recoverable failures instead of repairing them\n\
         \t--json                print each answer as JSON, with its decision ledger\n\
         \t--expr <expression>   answer one expression and exit\n\
         \t-h, --help            show this help\n\
         REPL commands:\n\
         \t:columns  :kpis  :prompt <question>  exit"
    );
}
