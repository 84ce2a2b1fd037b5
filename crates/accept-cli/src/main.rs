//! ACCEPT - approximate program configuration search
//!
//! The `accept` command builds relaxed variants of a program, measures
//! them against the precise build and reports the configurations worth
//! keeping.
//!
//! ## Commands
//!
//! - `exp`: Run the full search over one or more program directories
//! - `log`: Show the build/run log of one execution
//! - `precise`: Run the precise build once
//! - `approx`: Run and classify one relaxation config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Instrument, Level};

use accept_core::config::{describe_config, parse_relax_config, RelaxConfig};
use accept_core::domain::{AcceptError, Execution, Output};
use accept_core::evaluation::{EvalSettings, Evaluation};
use accept_core::execute::{BuildAndExecute, Harness, HarnessSettings};
use accept_core::metrics::METRICS;
use accept_core::obs::eval_span;
use accept_core::reporting::{summarize, write_results_json, ResultsArtifact};
use accept_core::result::{triage_results, ConfigResult};
use accept_core::sandbox::SandboxMode;
use accept_core::scheduler::{JobScheduler, SchedulerOptions};
use accept_core::{BuildSystem, MakeBuildSystem, MakeSettings, Scorer, ScriptScorer};
use accept_state::{MemoLocation, SurrealConnector};

#[derive(Parser)]
#[command(name = "accept")]
#[command(author = "ACCEPT Developers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Approximate program configuration search", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run jobs on a pool of N workers instead of one at a time
    #[arg(short, long, global = true, env = "ACCEPT_WORKERS")]
    workers: Option<usize>,

    /// Recompute results even when they are memoized
    #[arg(short, long, global = true)]
    force: bool,

    /// Executions per configuration (default: 1 locally, 5 with --workers)
    #[arg(short, long, global = true)]
    reps: Option<u32>,

    /// Memo store location
    #[arg(long, global = true, env = "ACCEPT_DB", default_value = "memo.db")]
    db: PathBuf,

    /// Extra make variable, e.g. `--make-var APP_MK=../app.mk` (repeatable)
    #[arg(long = "make-var", global = true, value_parser = parse_key_val)]
    make_vars: Vec<(String, String)>,

    /// Give up on `make clean`/`make build` after this many seconds
    #[arg(long, global = true)]
    build_timeout: Option<u64>,

    /// Copy program directories into sandboxes instead of symlinking
    #[arg(long, global = true)]
    copy_sandbox: bool,

    /// Leave sandbox directories on disk
    #[arg(long, global = true)]
    keep_sandbox: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search relaxation configs for each program directory
    Exp {
        /// Program directories
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Re-measure the optimal configs on the held-out test input
        #[arg(long)]
        test: bool,

        /// Write `<name>.results.json` for each program into this directory
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Show the build and run log of one execution
    Log {
        /// Program directory
        dir: PathBuf,

        /// Relaxation config file (default: the precise build)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Build and run the precise program once
    Precise {
        /// Program directory
        dir: PathBuf,
    },

    /// Build, run and classify one relaxation config
    Approx {
        /// Program directory
        dir: PathBuf,

        /// Relaxation config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{}`", s)),
    }
}

/// Everything a command needs besides the scheduler.
struct Session {
    verbose: bool,
    eval: EvalSettings,
    make: MakeSettings,
    harness: HarnessSettings,
}

impl Session {
    fn from_cli(cli: &Cli) -> Self {
        let eval = match cli.workers {
            Some(_) => EvalSettings::cluster(),
            None => EvalSettings::local(),
        };
        let eval = match cli.reps {
            Some(reps) => eval.with_reps(reps),
            None => eval,
        };
        Self {
            verbose: cli.verbose,
            eval,
            make: MakeSettings {
                variables: cli.make_vars.clone(),
                build_timeout_secs: cli.build_timeout,
                ..MakeSettings::default()
            },
            harness: HarnessSettings {
                sandbox_mode: if cli.copy_sandbox {
                    SandboxMode::Copy
                } else {
                    SandboxMode::Symlink
                },
                keep_sandbox: cli.keep_sandbox,
                ..HarnessSettings::default()
            },
        }
    }

    /// Make-driven build and the program's scoring script.
    fn harness_for(&self, dir: &Path) -> Result<Arc<Harness>> {
        let scorer: Arc<dyn Scorer> = Arc::new(ScriptScorer::for_program(dir)?);
        let build: Arc<dyn BuildSystem> = Arc::new(MakeBuildSystem::new(self.make.clone()));
        Ok(Arc::new(Harness::new(build, scorer, self.harness.clone())))
    }
}

fn read_config(path: &Path) -> Result<RelaxConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config = parse_relax_config(&text).map_err(AcceptError::from)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    accept_core::init_tracing(cli.json, level);

    let session = Session::from_cli(&cli);
    let options = match cli.workers {
        Some(workers) => SchedulerOptions::pool(workers),
        None => SchedulerOptions::local(),
    }
    .with_force(cli.force);

    let connector = SurrealConnector::new(MemoLocation::File(cli.db.clone()));
    let sched = JobScheduler::enter(&connector, options)
        .await
        .context("Failed to open memo store")?;

    let outcome = match &cli.command {
        Commands::Exp {
            dirs,
            test,
            results_dir,
        } => cmd_exp(&session, &sched, dirs, *test, results_dir.as_deref()).await,
        Commands::Log { dir, config } => cmd_log(&session, &sched, dir, config.as_deref()).await,
        Commands::Precise { dir } => cmd_precise(&session, &sched, dir).await,
        Commands::Approx { dir, config } => cmd_approx(&session, &sched, dir, config).await,
    };
    let outcome = sched.close_with(outcome).await;
    METRICS.flush();

    if let Err(e) = &outcome {
        if let Some(err) = e.downcast_ref::<AcceptError>() {
            if err.is_user_error() {
                eprintln!("error: {}", err);
                if let Some(log) = err.log().filter(|l| !l.trim().is_empty()) {
                    eprintln!("\n{}", log.trim_end());
                }
                std::process::exit(1);
            }
        }
    }
    outcome
}

/// Full search over each program, printing the triaged results.
async fn cmd_exp(
    session: &Session,
    sched: &JobScheduler,
    dirs: &[PathBuf],
    test: bool,
    results_dir: Option<&Path>,
) -> Result<()> {
    if let Some(out) = results_dir {
        std::fs::create_dir_all(out).with_context(|| format!("create {:?}", out))?;
    }

    for dir in dirs {
        let name = dir.display().to_string();
        println!("{}", name);
        exp_one(session, sched, dir, &name, test, results_dir)
            .instrument(eval_span(&name))
            .await?;
    }
    Ok(())
}

async fn exp_one(
    session: &Session,
    sched: &JobScheduler,
    dir: &Path,
    name: &str,
    test: bool,
    results_dir: Option<&Path>,
) -> Result<()> {
    let harness = session.harness_for(dir)?;
    let mut eval = Evaluation::new(dir, sched, harness, session.eval.clone());
    let results = eval.run(None).await?;
    let triage = triage_results(&results);
    print!("{}", summarize(&triage, eval.descs(), session.verbose));

    let mut test_results = Vec::new();
    if test && !triage.optimal.is_empty() {
        let configs: Vec<RelaxConfig> = triage.optimal.iter().map(|r| r.config.clone()).collect();
        test_results = eval.test_runs(&configs).await?;
        println!("\ntest results:");
        for res in &test_results {
            print_result(res, &eval);
        }
    }

    if let Some(out) = results_dir {
        let file_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "program".to_string());
        let path = out.join(format!("{}.results.json", file_name));
        let artifact = ResultsArtifact::new(name, &triage).with_test(test_results);
        write_results_json(&path, &artifact)?;
        info!(path = %path.display(), "Results written");
    }
    Ok(())
}

fn print_result(res: &ConfigResult, eval: &Evaluation<'_>) {
    println!("{}", describe_config(&res.config, eval.descs()));
    match (res.error, res.speedup) {
        (Some(e), Some(s)) if res.safe => {
            println!("{:.1}% error", e.value * 100.0);
            println!("{} speedup", s);
        }
        _ => println!("{}", res.desc),
    }
}

/// Run one execution (rep 0, training input) through the scheduler.
async fn execute_once(
    session: &Session,
    sched: &JobScheduler,
    dir: &Path,
    config: Option<RelaxConfig>,
) -> Result<Execution> {
    let harness = session.harness_for(dir)?;
    let job = BuildAndExecute::new(harness, dir, config, 0, false);
    sched.submit(job.clone()).await.map_err(AcceptError::from)?;
    let exec = sched.get(&job).await.map_err(AcceptError::from)?;
    Ok(exec)
}

async fn cmd_log(
    session: &Session,
    sched: &JobScheduler,
    dir: &Path,
    config: Option<&Path>,
) -> Result<()> {
    let config = config.map(read_config).transpose()?;
    let exec = execute_once(session, sched, dir, config).await?;
    print!("{}", exec.log);
    if !exec.log.ends_with('\n') && !exec.log.is_empty() {
        println!();
    }
    println!("status: {}", exec.status);
    Ok(())
}

fn show_output(output: &Output) -> Result<String> {
    Ok(match output {
        Output::Value(v) => serde_json::to_string(v)?,
        Output::File(path) => format!("file:{}", path.display()),
    })
}

async fn cmd_precise(session: &Session, sched: &JobScheduler, dir: &Path) -> Result<()> {
    let exec = execute_once(session, sched, dir, None).await?;
    if !exec.succeeded() {
        return Err(AcceptError::PreciseExecutionFailed {
            reason: exec.status.to_string(),
            log: exec.log,
        }
        .into());
    }

    println!("status: {}", exec.status);
    if let Some(elapsed) = exec.elapsed {
        println!("elapsed: {:.3}s", elapsed);
    }
    if let Some(roi) = exec.roi_time {
        println!("roi time: {:.3}s", roi);
    }
    if let Some(output) = &exec.output {
        println!("output: {}", show_output(output)?);
    }
    if let Some(config) = &exec.config {
        let descs = exec.descs.clone().unwrap_or_default();
        println!("{} relaxation sites:", config.len());
        for (site, _) in config.iter() {
            match descs.get(site) {
                Some(desc) => println!("  {}  {}", site, desc),
                None => println!("  {}", site),
            }
        }
    }
    Ok(())
}

async fn cmd_approx(
    session: &Session,
    sched: &JobScheduler,
    dir: &Path,
    config: &Path,
) -> Result<()> {
    let config = read_config(config)?;
    if config.is_precise() {
        bail!("config relaxes no sites; use `accept precise` instead");
    }

    let harness = session.harness_for(dir)?;
    let mut eval = Evaluation::new(dir, sched, harness, session.eval.clone());
    let results = eval.run_approx(std::slice::from_ref(&config), false).await?;
    for res in &results {
        print_result(res, &eval);
        if res.safe && !res.good {
            println!("{}", res.desc);
        }
    }
    Ok(())
}
