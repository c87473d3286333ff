// src/engine/lifecycle.rs

//! Open/close state machine for one long-lived resource.
//!
//! A [`LifecycleSwitch`] serializes `start`, `close` and `restart` requests
//! through a [`CoalescingExecutor`], so the opener and closer of a resource
//! never run concurrently and redundant requests collapse.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::stream::ValueStream;
use crate::types::{lock, BoxFuture};

use super::coalesce::{CoalescingExecutor, ReasonSet};

/// Reason applies to opening.
pub const OPEN_MASK: u8 = 0b01;
/// Reason applies to closing.
pub const CLOSE_MASK: u8 = 0b10;
/// Reason applies to both halves of a restart.
pub const RESTART_MASK: u8 = OPEN_MASK | CLOSE_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchPhase {
    Closed,
    Opening,
    Opened,
    Closing,
}

/// A trigger reason tagged with the command(s) it was submitted for.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<R> {
    pub mask: u8,
    pub reason: Option<R>,
}

/// Releases the resource acquired by an opener.
pub type Closer<R> = Box<dyn FnOnce(ReasonSet<R>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Box an async closure as a [`Closer`].
pub fn closer<R, F, Fut>(f: F) -> Closer<R>
where
    F: FnOnce(ReasonSet<R>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |reasons| Box::pin(f(reasons)))
}

type Opener<R> = Arc<dyn Fn(ReasonSet<R>) -> BoxFuture<'static, anyhow::Result<Closer<R>>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Open,
    Close,
}

/// Ordered set of pending commands.
///
/// Queuing a close cancels a pending open; queuing an existing command keeps
/// its original position.
#[derive(Debug, Default)]
struct CommandQueue {
    cmds: Vec<Command>,
}

impl CommandQueue {
    fn add(&mut self, cmd: Command) {
        if cmd == Command::Close {
            self.cmds.retain(|c| *c != Command::Open);
        }
        if !self.cmds.contains(&cmd) {
            self.cmds.push(cmd);
        }
    }

    fn pop(&mut self) -> Option<Command> {
        if self.cmds.is_empty() {
            None
        } else {
            Some(self.cmds.remove(0))
        }
    }
}

struct SwitchShared<R> {
    title: String,
    opener: Opener<R>,
    cmds: Mutex<CommandQueue>,
    closer: Mutex<Option<Closer<R>>>,
    phases: ValueStream<SwitchPhase>,
}

/// Start/stop controller for a resource that must never be opened twice or
/// closed while opening.
pub struct LifecycleSwitch<R> {
    shared: Arc<SwitchShared<R>>,
    looper: CoalescingExecutor<Tagged<R>>,
    debounce: Option<Duration>,
}

impl<R> Clone for LifecycleSwitch<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            looper: self.looper.clone(),
            debounce: self.debounce,
        }
    }
}

impl<R> fmt::Debug for LifecycleSwitch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleSwitch")
            .field("title", &self.shared.title)
            .field("phase", &self.shared.phases.current())
            .finish_non_exhaustive()
    }
}

impl<R> LifecycleSwitch<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    /// `opener` acquires the resource and returns the closer that releases it.
    /// It receives the reasons submitted with the open-side commands.
    pub fn new<F, Fut>(title: impl Into<String>, opener: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Closer<R>>> + Send + 'static,
    {
        Self::build(title.into(), None, opener)
    }

    /// Switch whose commands wait `debounce` before being processed, unless
    /// the caller passes an explicit debounce.
    pub fn with_debounce<F, Fut>(title: impl Into<String>, debounce: Duration, opener: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Closer<R>>> + Send + 'static,
    {
        Self::build(title.into(), Some(debounce), opener)
    }

    fn build<F, Fut>(title: String, debounce: Option<Duration>, opener: F) -> Self
    where
        F: Fn(ReasonSet<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Closer<R>>> + Send + 'static,
    {
        let opener: Opener<R> = Arc::new(move |reasons| Box::pin(opener(reasons)));
        let shared = Arc::new(SwitchShared {
            phases: ValueStream::with_value(format!("{title}:phase"), SwitchPhase::Closed),
            title: title.clone(),
            opener,
            cmds: Mutex::new(CommandQueue::default()),
            closer: Mutex::new(None),
        });

        let effect_shared = Arc::clone(&shared);
        let looper = CoalescingExecutor::new(format!("{title}:switch"), move |reasons| {
            let shared = Arc::clone(&effect_shared);
            async move {
                shared.drain(reasons).await;
                Ok(())
            }
        });

        Self {
            shared,
            looper,
            debounce,
        }
    }

    pub fn start(&self, reason: Option<R>) {
        self.start_with(reason, self.debounce);
    }

    pub fn start_with(&self, reason: Option<R>, debounce: Option<Duration>) {
        lock(&self.shared.cmds).add(Command::Open);
        self.looper.schedule_with(Some(Tagged { mask: OPEN_MASK, reason }), debounce);
    }

    pub fn close(&self, reason: Option<R>) {
        self.close_with(reason, self.debounce);
    }

    pub fn close_with(&self, reason: Option<R>, debounce: Option<Duration>) {
        lock(&self.shared.cmds).add(Command::Close);
        self.looper.schedule_with(Some(Tagged { mask: CLOSE_MASK, reason }), debounce);
    }

    pub fn restart(&self, reason: Option<R>) {
        self.restart_with(reason, self.debounce);
    }

    /// Queue a close followed by an open as one step.
    pub fn restart_with(&self, reason: Option<R>, debounce: Option<Duration>) {
        {
            let mut cmds = lock(&self.shared.cmds);
            cmds.add(Command::Close);
            cmds.add(Command::Open);
        }
        self.looper.schedule_with(Some(Tagged { mask: RESTART_MASK, reason }), debounce);
    }

    pub fn phase(&self) -> SwitchPhase {
        self.shared.phase()
    }

    /// Stream of phase transitions, seeded with the current phase.
    pub fn phases(&self) -> ValueStream<SwitchPhase> {
        self.shared.phases.clone()
    }

    /// Resolve once the switch reaches `phase` (immediately if it is there).
    pub async fn wait_for(&self, phase: SwitchPhase) {
        let mut follower = self.shared.phases.subscribe();
        while let Some(current) = follower.next().await {
            if current == phase {
                return;
            }
        }
    }

    /// `true` when no command is pending or executing.
    pub fn is_settled(&self) -> bool {
        self.looper.is_idle()
    }

    pub fn title(&self) -> &str {
        &self.shared.title
    }
}

impl<R> SwitchShared<R>
where
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn phase(&self) -> SwitchPhase {
        self.phases.current().unwrap_or(SwitchPhase::Closed)
    }

    fn set_phase(&self, phase: SwitchPhase) {
        debug!(switch = %self.title, ?phase, "phase");
        self.phases.push(phase);
    }

    /// Run the commands queued so far. Commands queued meanwhile belong to
    /// the follow-up run, which carries their reasons.
    async fn drain(&self, reasons: ReasonSet<Tagged<R>>) {
        let mut cmds = std::mem::take(&mut *lock(&self.cmds));
        while let Some(cmd) = cmds.pop() {

            match (cmd, self.phase()) {
                (Command::Open, SwitchPhase::Closed) => {
                    self.open(reasons_for(&reasons, OPEN_MASK)).await;
                }
                (Command::Close, SwitchPhase::Opened) => {
                    self.shut(reasons_for(&reasons, CLOSE_MASK)).await;
                }
                (cmd, phase) => {
                    debug!(switch = %self.title, ?cmd, ?phase, "command has no effect in this phase");
                }
            }
        }
    }

    async fn open(&self, reasons: ReasonSet<R>) {
        self.set_phase(SwitchPhase::Opening);
        let fut = (self.opener)(reasons);
        match tokio::spawn(fut).await {
            Ok(Ok(closer)) => {
                *lock(&self.closer) = Some(closer);
                info!(switch = %self.title, "opened");
                self.set_phase(SwitchPhase::Opened);
            }
            Ok(Err(err)) => {
                error!(switch = %self.title, error = %err, "failed to open");
                self.set_phase(SwitchPhase::Closed);
            }
            Err(join_err) => {
                error!(switch = %self.title, error = %join_err, "opener panicked");
                self.set_phase(SwitchPhase::Closed);
            }
        }
    }

    async fn shut(&self, reasons: ReasonSet<R>) {
        self.set_phase(SwitchPhase::Closing);
        let closer = lock(&self.closer).take();
        if let Some(closer) = closer {
            match tokio::spawn(closer(reasons)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(switch = %self.title, error = %err, "failed to close cleanly");
                }
                Err(join_err) => {
                    error!(switch = %self.title, error = %join_err, "closer panicked");
                }
            }
        }
        info!(switch = %self.title, "closed");
        self.set_phase(SwitchPhase::Closed);
    }
}

fn reasons_for<R: Clone + PartialEq>(tagged: &ReasonSet<Tagged<R>>, mask: u8) -> ReasonSet<R> {
    tagged
        .iter()
        .filter(|t| t.mask & mask != 0)
        .filter_map(|t| t.reason.clone())
        .collect()
}
