//! `alpha-evolve` command-line entry point
//!
//! Resolves configuration, evaluates the seed, runs the evolution loop and
//! prints a summary. Exits non-zero if the run aborts.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use evo_core::{
    EvolutionController, EvolutionSummary, EvolveConfig, EvolveError, OpenAiGenerator,
    DEFAULT_GENERATIONS,
};
use evo_program::{ApplyPolicy, Program};
use evo_sandbox::{RuntimeSpec, SandboxEvaluator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn cli() -> Command {
    Command::new("alpha-evolve")
        .version(evo_core::VERSION)
        .about("Evolve the marked regions of a program with LLM-proposed diffs")
        .arg(
            Arg::new("program_path")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the initial program file to be evolved"),
        )
        .arg(
            Arg::new("eval_script_path")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the evaluation script file"),
        )
        .arg(
            Arg::new("generations")
                .long("generations")
                .value_parser(value_parser!(usize))
                .help(format!(
                    "Number of generations to run [default: {DEFAULT_GENERATIONS}]"
                )),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(parse_timeout)
                .help("Evaluation timeout in seconds, fractions allowed"),
        )
        .arg(
            Arg::new("primary-metric")
                .long("primary-metric")
                .help("Score key used to rank programs"),
        )
        .arg(
            Arg::new("strict-diffs")
                .long("strict-diffs")
                .action(ArgAction::SetTrue)
                .help("Reject candidates whose diff has any unresolved SEARCH block"),
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .value_parser(["python", "command"])
                .help("Worker runtime for the evaluation script"),
        )
        .arg(
            Arg::new("interpreter")
                .long("interpreter")
                .value_parser(value_parser!(PathBuf))
                .help("Interpreter running the evaluation script"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Write the best program to this file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{e}"))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err("must be a positive number of seconds".to_string()),
    }
}

/// Load `.env` from the working directory or a parent, if any
fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable environment file"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };
    tracing_subscriber::registry().with(filter).with(layer).init();
}

/// Merge file, environment and flag settings, in that order
fn resolve_config(args: &ArgMatches) -> Result<EvolveConfig, EvolveError> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => EvolveConfig::load(path)?,
        None => EvolveConfig::default(),
    }
    .with_env_overrides();

    if let Some(generations) = args.get_one::<usize>("generations") {
        config = config.with_generations(*generations);
    }
    if let Some(timeout) = args.get_one::<Duration>("timeout") {
        config = config.with_timeout(*timeout);
    }
    if let Some(metric) = args.get_one::<String>("primary-metric") {
        config = config.with_primary_metric(metric.clone());
    }
    if args.get_flag("strict-diffs") {
        config = config.with_diff_policy(ApplyPolicy::Strict);
    }

    let interpreter = args.get_one::<PathBuf>("interpreter").cloned();
    match args.get_one::<String>("runtime").map(String::as_str) {
        Some("command") => {
            config = config.with_runtime(RuntimeSpec::Command {
                program: interpreter.unwrap_or_else(|| PathBuf::from("sh")),
                args: Vec::new(),
                candidate_file: "candidate.txt".to_string(),
            });
        }
        Some(_) => {
            config = config.with_runtime(RuntimeSpec::Python {
                interpreter: interpreter.unwrap_or_else(|| PathBuf::from("python3")),
                routine: "evaluate".to_string(),
            });
        }
        None => {
            if let Some(path) = interpreter {
                config.runtime = match config.runtime {
                    RuntimeSpec::Python { routine, .. } => RuntimeSpec::Python {
                        interpreter: path,
                        routine,
                    },
                    RuntimeSpec::Command {
                        args,
                        candidate_file,
                        ..
                    } => RuntimeSpec::Command {
                        program: path,
                        args,
                        candidate_file,
                    },
                };
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn report(summary: &EvolutionSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    println!("Evolution finished.");
    println!("  Generations: {}", summary.generations_run);
    println!("  Inserted:    {}", summary.count("inserted"));
    println!("  Discarded:   {}", summary.count("discarded"));
    println!("  Rejected:    {}", summary.count("rejected"));
    println!("  Skipped:     {}", summary.count("skipped"));
    println!("  Population:  {}", summary.population_size);
    println!("  Elapsed:     {}s", elapsed.num_seconds());
    match &summary.best {
        Some(best) => {
            println!(
                "Best program: {} ({}) with scores {}",
                best.program().origin(),
                best.program().hash().short(),
                best.scores()
            );
        }
        None => println!("Population is empty."),
    }
}

async fn run(args: &ArgMatches) -> anyhow::Result<()> {
    load_dotenv();
    let config = resolve_config(args)?;
    let program_path = args
        .get_one::<PathBuf>("program_path")
        .context("missing program path")?;
    let eval_script = args
        .get_one::<PathBuf>("eval_script_path")
        .context("missing evaluation script path")?;

    let seed = Program::load(program_path)?;
    let runtime = config.runtime.build(eval_script);
    let evaluator = SandboxEvaluator::new(runtime, config.sandbox.clone());
    let generator = OpenAiGenerator::from_config(&config.generator)?;

    let mut controller = EvolutionController::from_config(&config, generator, evaluator);
    controller.initialize(seed).await?;
    let summary = controller.run(config.generations).await;
    report(&summary);

    if let (Some(path), Some(best)) = (args.get_one::<PathBuf>("output"), &summary.best) {
        std::fs::write(path, best.program().text())
            .with_context(|| format!("failed to write best program to {}", path.display()))?;
        println!("Best program written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli().get_matches();
    init_tracing(args.get_flag("log-json"));

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "evolution aborted");
            eprintln!("An error occurred during evolution: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(argv: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn cli_requires_both_paths() {
        assert!(cli().try_get_matches_from(["alpha-evolve", "seed.py"]).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = matches(&[
            "alpha-evolve",
            "seed.py",
            "eval.py",
            "--generations",
            "9",
            "--timeout",
            "12",
            "--primary-metric",
            "accuracy",
            "--strict-diffs",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.generations, 9);
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(12));
        assert_eq!(config.population.primary_metric, "accuracy");
        assert_eq!(config.diff_policy, ApplyPolicy::Strict);
    }

    #[test]
    fn command_runtime_uses_interpreter_as_program() {
        let args = matches(&[
            "alpha-evolve",
            "seed.txt",
            "score.sh",
            "--runtime",
            "command",
            "--interpreter",
            "bash",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(
            config.runtime,
            RuntimeSpec::Command {
                program: PathBuf::from("bash"),
                args: Vec::new(),
                candidate_file: "candidate.txt".to_string(),
            }
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        for bad in ["0", "-1", "NaN", "soon"] {
            assert!(
                cli()
                    .try_get_matches_from(["alpha-evolve", "a", "b", "--timeout", bad])
                    .is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn fractional_timeout_flag_is_kept() {
        let args = matches(&["alpha-evolve", "a", "b", "--timeout", "1.5"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.sandbox.timeout(), Duration::from_millis(1500));
    }
}
