//! ACCEPT Core Library
//!
//! Searches the space of relaxed builds of a program for configurations
//! that run faster than the precise build while keeping output error
//! within a bound. Re-exports the pieces the `accept` binary wires
//! together.

pub mod build;
pub mod composer;
pub mod config;
pub mod domain;
pub mod evaluation;
pub mod execute;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod result;
pub mod sandbox;
pub mod scheduler;
pub mod scoring;
pub mod telemetry;
pub mod uncertain;

pub use build::{BuildError, BuildSystem, MakeBuildSystem, MakeSettings, RunOutcome};
pub use composer::{bce_greedy, best_combined_configs, combined_speedup, Component};
pub use config::{
    cap_config, combine_configs, config_subsumes, describe_config, dump_relax_config,
    increase_config, parse_relax_config, parse_relax_desc, permute_config, ConfigError, Param,
    RelaxConfig, SiteId,
};
pub use domain::{AcceptError, Execution, ExitStatus, Output, Result};
pub use evaluation::{EvalSettings, EvalState, Evaluation};
pub use execute::{BuildAndExecute, Harness, HarnessSettings};
pub use reporting::{summarize, write_results_json, ResultsArtifact};
pub use result::{triage_results, ConfigResult, Triage, MAX_ERROR};
pub use sandbox::{Sandbox, SandboxMode};
pub use scheduler::{Dispatch, Job, JobScheduler, SchedulerError, SchedulerOptions};
pub use scoring::{Scorer, ScriptScorer};
pub use telemetry::init_tracing;
pub use uncertain::{Uncertain, UncertainError};

pub use accept_state::{MemoConnector, MemoLocation, SurrealConnector};
