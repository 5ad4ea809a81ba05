use std::path::PathBuf;
use std::process::Command;

use tracing::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::targets::{ProxyParams, Target, TargetEnv, TargetKind, http_proxy_url};

const PROXY_KEYS: [&str; 2] = ["http.proxy", "https.proxy"];

// `git config --unset-all` exits with 5 only when the key is not set.
const GIT_EXIT_KEY_MISSING: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitScope {
    Global,
    File(PathBuf),
}

impl GitScope {
    pub fn from_env(env: &TargetEnv) -> Self {
        match &env.git_config {
            Some(p) => GitScope::File(p.clone()),
            None => GitScope::Global,
        }
    }
}

/// Git's own `http.proxy` / `https.proxy` settings, set through `git config`.
/// There is no managed region, so `init` has nothing to do.
pub struct SourceControlTarget {
    program: String,
    scope: GitScope,
}

impl SourceControlTarget {
    pub fn new(scope: GitScope) -> Self {
        Self {
            program: "git".into(),
            scope,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn config_cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("config");
        match &self.scope {
            GitScope::Global => {
                cmd.arg("--global");
            }
            GitScope::File(p) => {
                cmd.arg("--file").arg(p);
            }
        }
        cmd.args(args);
        cmd
    }
}

impl Target for SourceControlTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::SourceControl
    }

    fn init(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        ctx.log("nothing to initialize");
        Ok(())
    }

    fn proxy(&mut self, params: &ProxyParams, ctx: &mut ExecCtx) -> Result<()> {
        let ip = params.require_ip(self.kind())?;
        let port = params.require_http_port(self.kind())?;
        let url = http_proxy_url(ip, port);

        for key in PROXY_KEYS {
            ctx.run_cmd(self.config_cmd(&[key, url.as_str()]))
                .map_err(|e| e.context(format!("git config {key}")))?;
            ctx.log(&format!("{key} = {url}"));
        }
        Ok(())
    }

    fn clear(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        // Removes repeated values too; plain `--unset` exits 5 on those.
        for key in PROXY_KEYS {
            let status = ctx.run_cmd_status(self.config_cmd(&["--unset-all", key]))?;
            if status.success() {
                ctx.log(&format!("{key} unset"));
            } else if status.code() == Some(GIT_EXIT_KEY_MISSING) {
                warn!(key, "git proxy key was not set");
                ctx.log(&format!("{key} already unset"));
            } else {
                return Err(Error::new(
                    ErrorKind::ExternalTool,
                    format!("git config --unset-all {key} failed: {status}"),
                ));
            }
        }
        Ok(())
    }
}
