use crate::client::{GitLabClient, RunClient};
use crate::config::{Config, Credential, ProjectId, DEFAULT_API_URL};
use crate::model::{Parameter, Phase, RunStatus, Session};
use crate::orchestrator::RunOrchestrator;
use crate::text_summary::{build_text_summary, status_line};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const MAVEN_ARGS_KEY: &str = "MAVEN_CLI_ARGS";

/// Output line routing for stdout/stderr writer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ci-run-watch",
    version,
    about = "Trigger a GitLab pipeline, follow it to completion and print its job logs"
)]
pub struct Cli {
    /// Base URL of the GitLab REST API
    #[arg(long, env = "GITLAB_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Project id or namespaced path (e.g. group/app)
    #[arg(long, env = "GITLAB_PROJECT_ID")]
    pub project: Option<String>,

    /// Access token sent as PRIVATE-TOKEN
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true, value_parser = parse_credential)]
    pub token: Option<Credential>,

    /// Branch to run the pipeline on (defaults to the project's first branch)
    #[arg(long = "ref", value_name = "BRANCH")]
    pub git_ref: Option<String>,

    /// Pipeline variable, repeatable; passed in the order given
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_parameter)]
    pub vars: Vec<Parameter>,

    /// Extra Maven arguments, passed as the MAVEN_CLI_ARGS variable
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub maven_args: Option<String>,

    /// Print the project's branches and exit
    #[arg(long)]
    pub list_branches: bool,

    /// Status polling interval
    #[arg(long, env = "CI_RUN_WATCH_POLL_INTERVAL", default_value = "5s", value_parser = parse_poll_interval)]
    pub poll_interval: humantime::Duration,

    /// Timeout for each API request
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Maximum number of job logs fetched at once (default: all)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub log_concurrency: Option<u64>,

    /// Base URL where successful runs publish their artifacts
    #[arg(long, env = "CI_RUN_WATCH_ARTIFACTS_URL")]
    pub artifacts_url: Option<String>,

    /// Print the final session as JSON
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CI_RUN_WATCH_LOG` or `warn` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Cli {
    /// `--var` values followed by the Maven arguments, if any.
    pub fn parameters(&self) -> Vec<Parameter> {
        let mut parameters = self.vars.clone();
        if let Some(args) = self.maven_args.as_deref() {
            if !args.trim().is_empty() {
                parameters.push(Parameter::new(MAVEN_ARGS_KEY, args));
            }
        }
        parameters
    }
}

fn parse_parameter(raw: &str) -> Result<Parameter, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("variable name is empty in `{raw}`"));
    }
    Ok(Parameter::new(key, value))
}

fn parse_poll_interval(raw: &str) -> Result<humantime::Duration, String> {
    let interval: humantime::Duration = raw.parse().map_err(|e| format!("{e}"))?;
    if Duration::from(interval).is_zero() {
        return Err("poll interval must be greater than zero".to_string());
    }
    Ok(interval)
}

fn parse_credential(raw: &str) -> Result<Credential, String> {
    Ok(Credential::new(raw.trim()))
}

/// A fatal error as printed on exit: plain on stdout in silent mode, on stderr otherwise.
pub(crate) fn fatal_error_line(err: &anyhow::Error, silent: bool) -> OutputLine {
    if silent {
        OutputLine::Stdout(format!("{err:#}"))
    } else {
        OutputLine::Stderr(format!("Error: {err:#}"))
    }
}

/// Build a `Config` from CLI arguments.
pub fn build_config(args: &Cli) -> Config {
    Config {
        api_url: args.api_url.clone(),
        project: args.project.as_deref().map(ProjectId::new),
        credential: args.token.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        log_concurrency: args
            .log_concurrency
            .and_then(|n| usize::try_from(n).ok()),
        artifacts_base_url: args.artifacts_url.clone(),
        ..Config::default()
    }
}

/// Run the CLI. Returns whether the run finished with `success`.
pub async fn run(args: Cli) -> Result<bool> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args);
    let client: Arc<dyn RunClient> =
        Arc::new(GitLabClient::new(&cfg).context("invalid configuration")?);

    if args.list_branches {
        let refs = client.list_refs().await.context("failed to fetch branches")?;
        let (out_tx, out_handle) = spawn_output_writer();
        for name in refs {
            let _ = out_tx.send(OutputLine::Stdout(name));
        }
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(true);
    }

    let git_ref = resolve_ref(args.git_ref.as_deref(), client.as_ref()).await?;
    watch_run(&args, client, cfg, &git_ref).await
}

/// The explicit ref, or the first branch the project lists.
async fn resolve_ref(explicit: Option<&str>, client: &dyn RunClient) -> Result<String> {
    if let Some(git_ref) = explicit.map(str::trim).filter(|r| !r.is_empty()) {
        return Ok(git_ref.to_string());
    }
    let refs = client.list_refs().await.context("failed to fetch branches")?;
    let first = refs
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no branches found for this project"))?;
    tracing::info!(git_ref = %first, "no ref given, using first branch");
    Ok(first)
}

/// Trigger one run and follow its snapshots until it settles or Ctrl-C.
async fn watch_run(
    args: &Cli,
    client: Arc<dyn RunClient>,
    cfg: Config,
    git_ref: &str,
) -> Result<bool> {
    let (orchestrator, loop_handle) = RunOrchestrator::spawn(client, cfg);
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let progress = if args.json { None } else { out_tx.clone() };

    let (snap_tx, mut snap_rx) = mpsc::unbounded_channel::<Arc<Session>>();
    let subscription = orchestrator.subscribe(move |snapshot| {
        let _ = snap_tx.send(snapshot);
    });

    orchestrator
        .trigger(git_ref, args.parameters())
        .context("failed to trigger run")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_line = String::new();
    let settled = loop {
        tokio::select! {
            snapshot = snap_rx.recv() => {
                let Some(snapshot) = snapshot else {
                    break None;
                };
                if let Some(tx) = progress.as_ref() {
                    // Repeated polls of the same status print once.
                    let line = status_line(&snapshot);
                    if line != last_line {
                        let _ = tx.send(OutputLine::Stderr(line.clone()));
                        last_line = line;
                    }
                }
                if snapshot.is_settled() {
                    break Some(snapshot);
                }
            }
            _ = &mut ctrl_c => {
                if let Some(tx) = progress.as_ref() {
                    let _ = tx.send(OutputLine::Stderr("Interrupted, stopping...".into()));
                }
                break None;
            }
        }
    };

    subscription.unsubscribe();
    orchestrator.shutdown();
    let _ = loop_handle.await;

    let outcome = match settled.as_deref() {
        Some(session) => {
            if let Some(tx) = out_tx.as_ref() {
                if args.json {
                    let out = serde_json::to_string_pretty(session)?;
                    let _ = tx.send(OutputLine::Stdout(out));
                } else {
                    for line in build_text_summary(session).lines {
                        let _ = tx.send(OutputLine::Stdout(line));
                    }
                }
            }
            Ok(succeeded(session))
        }
        None => Err(anyhow!("interrupted before the run finished")),
    };

    drop(progress);
    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    match (outcome, settled.as_deref()) {
        (Ok(false), Some(session)) if args.silent => Err(anyhow!("{}", status_line(session))),
        (outcome, _) => outcome,
    }
}

fn succeeded(session: &Session) -> bool {
    session.phase == Phase::Done && session.run_status() == Some(RunStatus::Success)
}
