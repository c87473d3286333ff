// src/exec/process.rs

//! Real process backend built on `tokio::process`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkspaceConfig;

use super::backend::{BuildBackend, BundleRequest, InstallRequest, TypecheckRequest};
use super::bundler::{parse_bundler_line, BundlerEvent};
use super::installer::{parse_install_line, InstallEvent};
use super::session::SessionProcess;
use super::typecheck::{parse_typecheck_line, TypecheckEvent};

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What to run for one session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub label: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// Spawn `spec.command` through the shell and supervise it.
///
/// Both output streams are parsed line by line with `parse`. Once the process
/// exits and its output is drained, `exit(code)` is sent as the final event.
/// A process stopped through the returned handle is killed and sends no exit
/// event.
pub fn spawn_session<E, P, X>(
    spec: SessionSpec,
    events: mpsc::UnboundedSender<E>,
    parse: P,
    exit: X,
) -> Result<SessionProcess>
where
    E: Send + 'static,
    P: Fn(&str) -> Vec<E> + Send + Sync + 'static,
    X: FnOnce(i32) -> E + Send + 'static,
{
    info!(session = %spec.label, cmd = %spec.command, cwd = %spec.cwd.display(), "starting process");

    let mut cmd = shell_command(&spec.command);
    cmd.current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for '{}'", spec.label))?;

    let parse = Arc::new(parse);
    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|s| pump(s, &spec.label, "stdout", &parse, &events)),
        child.stderr.take().map(|s| pump(s, &spec.label, "stderr", &parse, &events)),
    ]
    .into_iter()
    .flatten()
    .collect();

    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let label = spec.label.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        error!(session = %label, error = %e, "failed waiting for process");
                        -1
                    }
                };
                // Grandchildren may keep the pipes open; don't wait on them forever.
                for reader in readers {
                    let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
                }
                info!(session = %label, exit_code = code, "process exited");
                let _ = events.send(exit(code));
            }
            cancel = &mut cancel_rx => {
                if cancel.is_err() {
                    debug!(session = %label, "session handle dropped; killing process");
                } else {
                    info!(session = %label, "stopping process");
                }
                if let Err(e) = child.kill().await {
                    warn!(session = %label, error = %e, "failed to kill process");
                }
            }
        }
    });

    Ok(SessionProcess::new(spec.label, cancel_tx, handle))
}

fn pump<R, E, P>(
    stream: R,
    label: &str,
    channel: &'static str,
    parse: &Arc<P>,
    events: &mpsc::UnboundedSender<E>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    E: Send + 'static,
    P: Fn(&str) -> Vec<E> + Send + Sync + 'static,
{
    let label = label.to_string();
    let parse = Arc::clone(parse);
    let events = events.clone();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session = %label, channel, "{}", line);
            for event in parse(&line) {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    })
}

/// Substitute `{name}` placeholders in a command template.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Backend running the shell commands configured in `[workspace]`.
///
/// Templates may use `{root}`, and per command:
/// - bundler: `{project}`, `{path}`, `{entry}`, `{formats}`, `{profiles}`,
///   `{externals}`, `{out_dir}`, `{watch}`
/// - typecheck: `{refs}` (one `<path>/tsconfig.json` per project), `{watch}`
#[derive(Debug, Clone)]
pub struct CommandBackend {
    install_cmd: String,
    typecheck_cmd: String,
    bundle_cmd: String,
}

impl CommandBackend {
    pub fn new(
        install_cmd: impl Into<String>,
        typecheck_cmd: impl Into<String>,
        bundle_cmd: impl Into<String>,
    ) -> Self {
        Self {
            install_cmd: install_cmd.into(),
            typecheck_cmd: typecheck_cmd.into(),
            bundle_cmd: bundle_cmd.into(),
        }
    }

    pub fn from_config(cfg: &WorkspaceConfig) -> Self {
        Self::new(
            cfg.workspace.install_cmd.clone(),
            cfg.workspace.typecheck_cmd.clone(),
            cfg.workspace.bundle_cmd.clone(),
        )
    }
}

fn root_str(root: &Path) -> String {
    root.display().to_string()
}

impl BuildBackend for CommandBackend {
    fn spawn_install(
        &self,
        request: &InstallRequest,
        events: mpsc::UnboundedSender<InstallEvent>,
    ) -> Result<SessionProcess> {
        let manifest = serde_json::to_string(&request.manifest)
            .context("serializing combined manifest")?;
        let spec = SessionSpec {
            label: "install".to_string(),
            command: render_template(&self.install_cmd, &[("root", root_str(&request.root))]),
            cwd: request.root.clone(),
            env: vec![("WATCHBUILD_MANIFEST".to_string(), manifest)],
        };
        spawn_session(spec, events, parse_install_line, InstallEvent::Exit)
    }

    fn spawn_typecheck(
        &self,
        request: &TypecheckRequest,
        events: mpsc::UnboundedSender<TypecheckEvent>,
    ) -> Result<SessionProcess> {
        let refs = request
            .projects
            .iter()
            .map(|p| format!("{p}/tsconfig.json"))
            .collect::<Vec<_>>()
            .join(" ");
        let watch = if request.watch { "--watch" } else { "" };
        let spec = SessionSpec {
            label: "typecheck".to_string(),
            command: render_template(
                &self.typecheck_cmd,
                &[
                    ("root", root_str(&request.root)),
                    ("refs", refs),
                    ("watch", watch.to_string()),
                ],
            ),
            cwd: request.root.clone(),
            env: Vec::new(),
        };
        spawn_session(spec, events, parse_typecheck_line, TypecheckEvent::Exit)
    }

    fn spawn_bundler(
        &self,
        request: &BundleRequest,
        events: mpsc::UnboundedSender<BundlerEvent>,
    ) -> Result<SessionProcess> {
        let c = &request.config;
        let formats = c.formats.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(",");
        let watch = if request.watch { "--watch" } else { "" };
        let spec = SessionSpec {
            label: format!("bundle:{}", c.name),
            command: render_template(
                &self.bundle_cmd,
                &[
                    ("root", root_str(&request.root)),
                    ("project", c.name.clone()),
                    ("path", c.path.clone()),
                    ("entry", c.entry.clone()),
                    ("formats", formats.clone()),
                    ("profiles", c.profiles.join(",")),
                    ("externals", c.externals.join(",")),
                    ("out_dir", c.out_dir.clone()),
                    ("watch", watch.to_string()),
                ],
            ),
            cwd: request.root.join(&c.path),
            env: vec![
                ("WATCHBUILD_PROJECT".to_string(), c.name.clone()),
                ("WATCHBUILD_FORMATS".to_string(), formats),
            ],
        };
        spawn_session(spec, events, parse_bundler_line, BundlerEvent::Exit)
    }
}
