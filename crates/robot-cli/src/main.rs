//! Robot - run network specifications against the verification robot
//!
//! ## Commands
//!
//! - `run`: prepare scripts, run a system under test, verify the robot's view
//! - `probe`: check that the robot's control endpoint accepts connections

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use robot_control::{ControlChannel, TcpControl};
use robot_spec::{Latch, RobotConfig, SpecError, Specification, TestMetadata};
use serde::Serialize;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "robot")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Robot-verified network specifications", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scripts against the robot around an optional system under test
    Run {
        /// Script to prepare (repeatable, in order)
        #[arg(short, long = "script", required = true)]
        scripts: Vec<String>,

        /// Root that qualifies plain script names
        #[arg(long)]
        root: Option<String>,

        /// Robot control URI (default: $ROBOT_CONTROL_URI or tcp://localhost:11642)
        #[arg(long)]
        control: Option<String>,

        /// Per-read timeout in milliseconds
        #[arg(long)]
        read_timeout_ms: Option<u64>,

        /// Print a JSON run report
        #[arg(long)]
        report: bool,

        /// System under test, run while the robot plays its scripts
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Check that the robot accepts control connections
    Probe {
        /// Robot control URI (default: $ROBOT_CONTROL_URI or tcp://localhost:11642)
        #[arg(long)]
        control: Option<String>,
    },
}

/// Summary of one `robot run`, printed with `--report`.
#[derive(Debug, Serialize)]
struct RunReport {
    test: String,
    scripts: Vec<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    passed: bool,
    exit_code: Option<i32>,
    expected: Option<String>,
    observed: Option<String>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    robot_spec::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            scripts,
            root,
            control,
            read_timeout_ms,
            report,
            command,
        } => {
            let config = build_config(control.as_deref(), read_timeout_ms)?;
            let mut meta = TestMetadata::new(&test_name(&command), scripts);
            if let Some(root) = root.as_deref() {
                meta = meta.with_root(root);
            }
            cmd_run(meta, config, &command, report).await
        }
        Commands::Probe { control } => {
            let config = build_config(control.as_deref(), None)?;
            cmd_probe(&config).await
        }
    }
}

fn build_config(control: Option<&str>, read_timeout_ms: Option<u64>) -> Result<RobotConfig> {
    let mut config = match control {
        Some(uri) => RobotConfig {
            control_uri: uri.to_string(),
            ..RobotConfig::from_env()
        },
        None => RobotConfig::from_env(),
    };
    if let Some(ms) = read_timeout_ms {
        config = config.with_read_timeout(Duration::from_millis(ms));
    }
    config.validate().context("Invalid robot configuration")?;
    Ok(config)
}

fn test_name(command: &[String]) -> String {
    command
        .first()
        .cloned()
        .unwrap_or_else(|| "robot-run".to_string())
}

async fn cmd_run(
    meta: TestMetadata,
    config: RobotConfig,
    command: &[String],
    print_report: bool,
) -> Result<()> {
    let mut report = RunReport {
        test: meta.name.clone(),
        scripts: meta.resolved_scripts(),
        started_at: Utc::now(),
        finished_at: Utc::now(),
        passed: false,
        exit_code: None,
        expected: None,
        observed: None,
        error: None,
    };
    let mut spec = Specification::new(meta, config);

    let verdict = match spec.setup().await {
        Ok(()) => {
            let body = run_system_under_test(command, spec.latch()).await;
            let test_failed = match &body {
                Ok(code) => {
                    report.exit_code = *code;
                    code.is_some_and(|code| code != 0)
                }
                Err(error) => {
                    report.error = Some(format!("{error:#}"));
                    true
                }
            };
            spec.teardown(test_failed).await.map(|pair| (pair, test_failed))
        }
        Err(error) => {
            if spec.runner().is_some() {
                let _ = spec.teardown(true).await;
            }
            Err(error)
        }
    };
    report.finished_at = Utc::now();

    let result = match verdict {
        Ok((pair, false)) => {
            println!("PASS: robot observed the expected behavior");
            report.expected = Some(pair.expected);
            report.observed = Some(pair.observed);
            report.passed = true;
            Ok(())
        }
        Ok((pair, true)) => {
            report.expected = Some(pair.expected);
            report.observed = Some(pair.observed);
            Err(anyhow::anyhow!(
                "System under test failed: {}",
                report.error.as_deref().unwrap_or("non-zero exit status")
            ))
        }
        Err(error) => {
            if let SpecError::Mismatch { expected, observed } = &error {
                report.expected = Some(expected.clone());
                report.observed = Some(observed.clone());
            }
            report.error.get_or_insert_with(|| error.to_string());
            Err(anyhow::Error::new(error).context("Robot run failed"))
        }
    };

    if print_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    result
}

/// Runs `command` with inherited stdio and returns its exit code.
///
/// The robot is allowed to start once the process has been spawned. With no
/// command the robot starts immediately.
async fn run_system_under_test(command: &[String], latch: &Latch) -> Result<Option<i32>> {
    let Some((program, args)) = command.split_first() else {
        latch.notify_startable();
        return Ok(None);
    };

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn system under test: {program}"))?;
    info!(program = %program, "system under test started");
    latch.notify_startable();

    let status = child
        .wait()
        .await
        .context("Failed to wait for system under test")?;
    if !status.success() {
        warn!(program = %program, status = %status, "system under test failed");
    }
    Ok(Some(status.code().unwrap_or(-1)))
}

async fn cmd_probe(config: &RobotConfig) -> Result<()> {
    let mut control = TcpControl::new(config.address()?);
    let peer = control.peer();
    control
        .connect()
        .await
        .with_context(|| format!("Robot at {peer} is unreachable"))?;
    println!("Robot reachable at {peer}");
    control.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_cli_parses_run_with_command() {
        let cli = Cli::try_parse_from([
            "robot", "run", "-s", "server", "--script", "client", "--root", "org/echo",
            "--report", "--", "echo-server", "--port", "8080",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                scripts,
                root,
                report,
                command,
                ..
            } => {
                assert_eq!(scripts, vec!["server", "client"]);
                assert_eq!(root.as_deref(), Some("org/echo"));
                assert!(report);
                assert_eq!(command, vec!["echo-server", "--port", "8080"]);
            }
            Commands::Probe { .. } => panic!("parsed as probe"),
        }
    }

    #[test]
    fn test_cli_run_requires_script() {
        assert!(Cli::try_parse_from(["robot", "run"]).is_err());
    }

    #[test]
    fn test_build_config_overrides() {
        let config = build_config(Some("tcp://robot.local:9000"), Some(75)).unwrap();
        assert_eq!(config.control_uri, "tcp://robot.local:9000");
        assert_eq!(config.read_timeout(), Duration::from_millis(75));

        assert!(build_config(Some("http://robot.local"), None).is_err());
    }

    #[test]
    fn test_name_defaults_without_command() {
        assert_eq!(test_name(&[]), "robot-run");
        assert_eq!(test_name(&["echo-server".to_string()]), "echo-server");
    }

    #[tokio::test]
    async fn test_no_command_opens_startable() {
        let latch = Latch::new();
        let code = run_system_under_test(&[], &latch).await.unwrap();
        assert_eq!(code, None);
        latch.await_startable().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let latch = Latch::new();
        let code = run_system_under_test(&["false".to_string()], &latch)
            .await
            .unwrap();
        assert_eq!(code, Some(1));
    }

    #[tokio::test]
    async fn test_probe_reachable_and_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let config = RobotConfig::new(&format!("tcp://127.0.0.1:{port}"));
        cmd_probe(&config).await.unwrap();
        accept.await.unwrap().unwrap();

        // The listener is gone now.
        assert!(cmd_probe(&config).await.is_err());
    }
}
