use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use tracing::debug;

use crate::config::RecipeDoc;
use crate::error::{Error, ErrorKind, Result};
use crate::planner::{Plan, TargetGroup};
use crate::targets::{Operation, ProxyParams, Target, TargetEnv};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    TargetStarted {
        target: String,
    },
    StepStarted {
        id: String,
    },
    StepLog {
        id: String,
        line: String,
    },
    StepFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    TargetFinished {
        target: String,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    targets: usize,
    steps_ok: usize,
    steps_failed: usize,
    failed_steps: Vec<String>,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::TargetStarted { target } => {
                if let Ok(mut s) = self.state.lock() {
                    s.targets = s.targets.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("[{target}]");
            }
            ExecEvent::StepStarted { id } => println!("RUN: {id}"),
            ExecEvent::StepLog { id, line } => println!("[{id}] {line}"),
            ExecEvent::StepFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.steps_ok = s.steps_ok.saturating_add(1);
                    } else {
                        s.steps_failed = s.steps_failed.saturating_add(1);
                        s.failed_steps.push(id.clone());
                    }
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: {id} ({elapsed_ms}ms) {}", error.unwrap_or_default());
                }
            }
            ExecEvent::TargetFinished { .. } => println!("------------------------------"),
            ExecEvent::ExecutorDone { ok, error } => {
                let mut summary = String::from("SUMMARY:\n");
                if let Ok(mut s) = self.state.lock() {
                    let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                    summary.push_str(&format!(
                        "  targets: {}  steps: ok={} failed={}\n",
                        s.targets, s.steps_ok, s.steps_failed
                    ));
                    summary.push_str(&format!("  elapsed: {}ms\n", wall.as_millis()));
                    if !s.failed_steps.is_empty() {
                        summary.push_str(&format!("  failed_steps: {}\n", s.failed_steps.join(", ")));
                    }
                    *s = StdoutSinkState::default();
                }
                print!("{summary}");
                if let Some(e) = error {
                    println!("  error: {e}");
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_step: Option<String>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_step: None,
        }
    }

    pub fn set_step(&mut self, id: impl Into<String>) {
        self.current_step = Some(id.into());
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_step
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::StepLog {
            id,
            line: msg.to_string(),
        });
    }

    /// Runs `cmd` to completion, logging its output, and returns the exit
    /// status whatever it is. Only a failure to spawn is an error.
    pub fn run_cmd_status(&self, mut cmd: Command) -> Result<ExitStatus> {
        debug!(command = ?cmd, "spawning");
        cmd.stdin(Stdio::null());
        let out = cmd.output().map_err(|e| {
            Error::new(
                ErrorKind::ExternalTool,
                format!("failed to run {}: {e}", cmd.get_program().to_string_lossy()),
            )
        })?;
        for stream in [&out.stdout, &out.stderr] {
            for line in String::from_utf8_lossy(stream).lines() {
                let line = strip_controls(line);
                if !line.is_empty() {
                    self.log(&line);
                }
            }
        }
        debug!(status = %out.status, "command exited");
        Ok(out.status)
    }

    pub fn run_cmd(&self, cmd: Command) -> Result<()> {
        let status = self.run_cmd_status(cmd)?;
        if !status.success() {
            return Err(Error::new(
                ErrorKind::ExternalTool,
                format!("command failed: {status}"),
            ));
        }
        Ok(())
    }
}

fn strip_controls(line: &str) -> String {
    line.chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Runs every step of `plan` in order, stopping at the first failure.
///
/// Each target is constructed once, right before its first step runs. In dry
/// run mode steps are reported but no target is constructed.
pub fn execute_plan(
    plan: &Plan,
    params: &ProxyParams,
    env: &TargetEnv,
    ctx: &mut ExecCtx,
) -> Result<()> {
    for group in plan.groups() {
        ctx.sink.emit(ExecEvent::TargetStarted {
            target: group.name.clone(),
        });
        let mut target: Option<Box<dyn Target>> = None;

        for &op in &group.ops {
            let id = group.step_id(op);
            ctx.sink.emit(ExecEvent::StepStarted { id: id.clone() });
            ctx.set_step(id.clone());

            if ctx.dry_run {
                ctx.log(&format!("DRY-RUN: {} {}", group.kind, op));
                ctx.sink.emit(ExecEvent::StepFinished {
                    id,
                    ok: true,
                    error: None,
                    elapsed_ms: 0,
                });
                continue;
            }

            let start = Instant::now();
            let res = run_step(&mut target, group, op, params, env, ctx);
            let elapsed_ms = start.elapsed().as_millis();
            match res {
                Ok(()) => ctx.sink.emit(ExecEvent::StepFinished {
                    id,
                    ok: true,
                    error: None,
                    elapsed_ms,
                }),
                Err(e) => {
                    ctx.sink.emit(ExecEvent::StepFinished {
                        id: id.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                        elapsed_ms,
                    });
                    let e = e.context(format!("step '{id}' failed"));
                    ctx.sink.emit(ExecEvent::ExecutorDone {
                        ok: false,
                        error: Some(e.to_string()),
                    });
                    return Err(e);
                }
            }
        }

        ctx.sink.emit(ExecEvent::TargetFinished {
            target: group.name.clone(),
        });
    }
    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: true,
        error: None,
    });
    Ok(())
}

/// A loaded recipe with every name resolved, the proxy address substituted
/// and the managed file paths fixed.
#[derive(Debug)]
pub struct PreparedRecipe {
    pub plan: Plan,
    pub params: ProxyParams,
    pub env: TargetEnv,
}

impl PreparedRecipe {
    /// Plans first, then resolves the address. `descriptor` supplies the SSH
    /// connection string and is only read when a `proxy` step needs the client
    /// address.
    pub fn new<F>(doc: &RecipeDoc, descriptor: F) -> Result<Self>
    where
        F: FnOnce() -> Option<String>,
    {
        let plan = Plan::from_pipeline(&doc.recipe.pipeline)?;
        let params = if plan.runs(Operation::Proxy) {
            doc.proxy_params(descriptor)?
        } else {
            doc.unresolved_params()
        };
        let env = doc.target_env()?;
        Ok(Self { plan, params, env })
    }

    pub fn execute(&self, ctx: &mut ExecCtx) -> Result<()> {
        execute_plan(&self.plan, &self.params, &self.env, ctx)
    }
}

pub fn run_recipe<F>(doc: &RecipeDoc, descriptor: F, ctx: &mut ExecCtx) -> Result<()>
where
    F: FnOnce() -> Option<String>,
{
    PreparedRecipe::new(doc, descriptor)?.execute(ctx)
}

fn run_step(
    target: &mut Option<Box<dyn Target>>,
    group: &TargetGroup,
    op: Operation,
    params: &ProxyParams,
    env: &TargetEnv,
    ctx: &mut ExecCtx,
) -> Result<()> {
    let t = match target.take() {
        Some(t) => t,
        None => group.kind.build(env)?,
    };
    let t = target.insert(t);
    op.apply(t.as_mut(), params, ctx)
}
