//! Build-event boundary to the external bundler.
//!
//! The bundler (esbuild) is spawned once at startup in watch mode and owns
//! its own file watching and rebuild scheduling. This module turns its
//! stderr into [`BuildOutcome`] batches on a channel: one batch per finished
//! build, errors and all. A consumer task logs every diagnostic and pokes
//! the rebuild notifier exactly once per batch, so connected clients reload
//! even when the build failed and the page only shows its errors.
//!
//! The channel is the whole contract; nothing else crosses the boundary in
//! either direction, and sending never blocks the producer.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::reload::RebuildNotifier;

const BUNDLER_COMMAND: &str = "esbuild";

const BUILD_FINISHED_MARKER: &str = "[watch] build finished";
const ERROR_MARKER: &str = "[ERROR]";
const WARNING_MARKER: &str = "[WARNING]";

/// One compile error or warning reported by the bundler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildDiagnostic {
    /// Source file the diagnostic points at, empty when the bundler did not
    /// report a location.
    pub file: String,
    /// 1-based line number, zero when unknown.
    pub line: u64,
    /// Human-readable message.
    pub message: String,
}

/// Everything the bundler reported for one finished build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Compile errors. A non-empty list means the build failed.
    pub errors: Vec<BuildDiagnostic>,
    /// Compile warnings.
    pub warnings: Vec<BuildDiagnostic>,
}

impl BuildOutcome {
    /// Whether the build produced usable artifacts.
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Spawn the bundler in watch mode and return the stream of build outcomes.
///
/// Failing to start the process is fatal; the bundler exiting later is not —
/// the server keeps serving whatever was last built, it just stops hearing
/// about rebuilds.
pub(crate) fn spawn_watch(
    config: &ServerConfig,
) -> Result<mpsc::UnboundedReceiver<BuildOutcome>, Error> {
    let mut command = watch_command(config);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| Error::BundlerSpawn {
        command: String::from(BUNDLER_COMMAND),
        source,
    })?;
    let Some(stderr) = child.stderr.take() else {
        return Err(Error::BundlerSpawn {
            command: String::from(BUNDLER_COMMAND),
            source: std::io::Error::other("stderr pipe missing"),
        });
    };

    let (outcomes, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut parser = StderrParser::new();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(outcome) = parser.push_line(&line) {
                        if outcomes.send(outcome).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(read_error) => {
                    warn!(error = %read_error, "failed to read bundler output");
                    break;
                }
            }
        }

        match child.wait().await {
            Ok(status) => warn!(%status, "bundler exited, rebuild notifications are disabled"),
            Err(wait_error) => warn!(error = %wait_error, "failed to reap bundler process"),
        }
    });

    Ok(receiver)
}

/// Drain build outcomes: log the diagnostics, then signal connected clients.
///
/// Exactly one signal per outcome, success or failure — a failed build still
/// reloads the page so the developer sees the breakage immediately.
pub(crate) async fn forward_events(
    mut outcomes: mpsc::UnboundedReceiver<BuildOutcome>,
    notifier: RebuildNotifier,
) {
    while let Some(outcome) = outcomes.recv().await {
        log_outcome(&outcome);
        notifier.signal();
    }
}

fn log_outcome(outcome: &BuildOutcome) {
    if !outcome.errors.is_empty() {
        error!(count = outcome.errors.len(), "build finished with errors");
        for diagnostic in &outcome.errors {
            error!(
                "{}:{} {}",
                diagnostic.file, diagnostic.line, diagnostic.message
            );
        }
    }
    if !outcome.warnings.is_empty() {
        warn!(count = outcome.warnings.len(), "build finished with warnings");
        for diagnostic in &outcome.warnings {
            warn!(
                "{}:{} {}",
                diagnostic.file, diagnostic.line, diagnostic.message
            );
        }
    }
    if outcome.succeeded() {
        info!("build finished");
    }
}

fn watch_command(config: &ServerConfig) -> Command {
    let entry = config.source_dir.join(&config.js_entry);
    let outfile = config.build_dir.join(&config.js_target);

    let mut command = Command::new(BUNDLER_COMMAND);
    command
        .arg(entry)
        .arg("--bundle")
        .arg(format!("--outfile={}", outfile.display()))
        .arg("--loader:.ttf=dataurl")
        .arg("--color=false")
        .arg("--watch=forever");
    if let Some(factory) = &config.jsx_factory {
        command.arg(format!("--jsx-factory={factory}"));
    }
    if let Some(fragment) = &config.jsx_fragment {
        command.arg(format!("--jsx-fragment={fragment}"));
    }
    command
}

#[derive(Clone, Copy, Debug)]
enum Severity {
    Error,
    Warning,
}

struct PendingDiagnostic {
    severity: Severity,
    message: String,
    location: Option<(String, u64)>,
}

/// Incremental parser for esbuild's watch-mode stderr.
///
/// Diagnostics arrive as a `[ERROR]`/`[WARNING]` marker line carrying the
/// message, followed by an indented `file:line:column:` location line and a
/// source excerpt. `[watch] build finished` closes a build and yields the
/// accumulated batch. Unrecognized lines are ignored, so cosmetic changes in
/// the excerpt rendering do not break the stream.
#[derive(Default)]
pub struct StderrParser {
    pending: Option<PendingDiagnostic>,
    errors: Vec<BuildDiagnostic>,
    warnings: Vec<BuildDiagnostic>,
}

impl StderrParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stderr line; returns a batch when it completed a build.
    pub fn push_line(&mut self, line: &str) -> Option<BuildOutcome> {
        let trimmed = line.trim();

        if trimmed.starts_with(BUILD_FINISHED_MARKER) {
            self.flush_pending();
            return Some(BuildOutcome {
                errors: std::mem::take(&mut self.errors),
                warnings: std::mem::take(&mut self.warnings),
            });
        }

        if let Some(message) = marker_message(trimmed, ERROR_MARKER) {
            self.flush_pending();
            self.pending = Some(PendingDiagnostic {
                severity: Severity::Error,
                message,
                location: None,
            });
            return None;
        }
        if let Some(message) = marker_message(trimmed, WARNING_MARKER) {
            self.flush_pending();
            self.pending = Some(PendingDiagnostic {
                severity: Severity::Warning,
                message,
                location: None,
            });
            return None;
        }

        if let Some(pending) = &mut self.pending {
            if pending.location.is_none() {
                pending.location = parse_location(trimmed);
            }
        }
        None
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            let (file, line) = pending.location.unwrap_or_default();
            let diagnostic = BuildDiagnostic {
                file,
                line,
                message: pending.message,
            };
            match pending.severity {
                Severity::Error => self.errors.push(diagnostic),
                Severity::Warning => self.warnings.push(diagnostic),
            }
        }
    }
}

fn marker_message(line: &str, marker: &str) -> Option<String> {
    line.find(marker)
        .map(|index| line[index + marker.len()..].trim().to_owned())
}

fn parse_location(line: &str) -> Option<(String, u64)> {
    let stripped = line.strip_suffix(':')?;
    let mut parts = stripped.rsplitn(3, ':');
    let column = parts.next()?;
    let line_number = parts.next()?;
    let file = parts.next()?;

    column.parse::<u64>().ok()?;
    let line_number = line_number.parse::<u64>().ok()?;
    if file.is_empty() {
        return None;
    }
    Some((file.to_owned(), line_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut StderrParser, output: &str) -> Vec<BuildOutcome> {
        output
            .lines()
            .filter_map(|line| parser.push_line(line))
            .collect()
    }

    #[test]
    fn clean_build_yields_an_empty_outcome() {
        let mut parser = StderrParser::new();
        let outcomes = feed(&mut parser, "[watch] build finished\n");

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded());
        assert!(outcomes[0].warnings.is_empty());
    }

    #[test]
    fn parses_error_with_location() {
        let mut parser = StderrParser::new();
        let outcomes = feed(
            &mut parser,
            concat!(
                "\u{2718} [ERROR] Could not resolve \"./missing\"\n",
                "\n",
                "    src/index.jsx:3:20:\n",
                "      3 \u{2502} import missing from \"./missing\";\n",
                "        \u{2575}                     ~~~~~~~~~~~\n",
                "\n",
                "[watch] build finished\n",
            ),
        );

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].succeeded());
        assert_eq!(
            outcomes[0].errors,
            vec![BuildDiagnostic {
                file: String::from("src/index.jsx"),
                line: 3,
                message: String::from("Could not resolve \"./missing\""),
            }]
        );
    }

    #[test]
    fn separates_errors_from_warnings() {
        let mut parser = StderrParser::new();
        let outcomes = feed(
            &mut parser,
            concat!(
                "\u{2718} [ERROR] Expected \"}\" but found end of file\n",
                "    src/app.jsx:40:0:\n",
                "\u{25b2} [WARNING] Duplicate key \"id\" in object literal\n",
                "    src/app.jsx:12:4:\n",
                "[watch] build finished\n",
            ),
        );

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].errors.len(), 1);
        assert_eq!(outcomes[0].warnings.len(), 1);
        assert_eq!(outcomes[0].warnings[0].file, "src/app.jsx");
        assert_eq!(outcomes[0].warnings[0].line, 12);
    }

    #[test]
    fn diagnostic_without_location_keeps_defaults() {
        let mut parser = StderrParser::new();
        let outcomes = feed(
            &mut parser,
            concat!(
                "\u{2718} [ERROR] Two output files share the same path\n",
                "[watch] build finished\n",
            ),
        );

        assert_eq!(outcomes[0].errors.len(), 1);
        assert_eq!(outcomes[0].errors[0].file, "");
        assert_eq!(outcomes[0].errors[0].line, 0);
    }

    #[test]
    fn consecutive_builds_do_not_leak_diagnostics() {
        let mut parser = StderrParser::new();
        let outcomes = feed(
            &mut parser,
            concat!(
                "\u{2718} [ERROR] Syntax error\n",
                "    src/index.jsx:1:0:\n",
                "[watch] build finished\n",
                "[watch] build started (change: \"src/index.jsx\")\n",
                "[watch] build finished\n",
            ),
        );

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[1].succeeded());
    }

    #[test]
    fn excerpt_lines_are_not_mistaken_for_locations() {
        assert_eq!(parse_location("src/index.jsx:3:20:"), Some((String::from("src/index.jsx"), 3)));
        assert_eq!(parse_location("3 \u{2502} import missing from \"./missing\";"), None);
        assert_eq!(parse_location("note:"), None);
        assert_eq!(parse_location(""), None);
    }

    #[test]
    fn watch_command_reflects_bundler_options() {
        let config = ServerConfig {
            host: String::from("127.0.0.1"),
            port: 8000,
            source_dir: std::path::PathBuf::from("web/src"),
            build_dir: std::path::PathBuf::from("web/dist"),
            html_entry: String::from("index.html"),
            js_entry: String::from("index.jsx"),
            js_target: String::from("bundle.js"),
            css_target: String::from("bundle.css"),
            jsx_factory: Some(String::from("h")),
            jsx_fragment: Some(String::from("Fragment")),
        };

        let command = watch_command(&config);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&String::from("--bundle")));
        assert!(args.contains(&String::from("--watch=forever")));
        assert!(args.contains(&String::from("--jsx-factory=h")));
        assert!(args.contains(&String::from("--jsx-fragment=Fragment")));
        assert!(args
            .iter()
            .any(|arg| arg.starts_with("--outfile=") && arg.ends_with("bundle.js")));
    }

    #[tokio::test]
    async fn forwarding_signals_once_per_outcome() {
        let notifier = RebuildNotifier::new();
        let mut receiver = notifier.subscribe();
        let (sender, outcomes) = mpsc::unbounded_channel();

        let consumer = tokio::spawn(forward_events(outcomes, notifier.clone()));

        sender.send(BuildOutcome::default()).unwrap();
        receiver.recv().await.unwrap();

        sender
            .send(BuildOutcome {
                errors: vec![BuildDiagnostic {
                    file: String::from("src/app.jsx"),
                    line: 1,
                    message: String::from("broken"),
                }],
                warnings: Vec::new(),
            })
            .unwrap();
        receiver.recv().await.unwrap();

        drop(sender);
        consumer.await.unwrap();
    }
}
