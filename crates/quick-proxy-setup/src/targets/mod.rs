use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;

pub mod git;
pub mod shell;
pub mod ssh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    ShellEnv,
    SourceControl,
    SshClient,
}

// Recipe names accepted for each target. The first entry per kind is canonical.
const TARGET_NAMES: &[(&str, TargetKind)] = &[
    ("ShellEnv", TargetKind::ShellEnv),
    ("ProxyBash", TargetKind::ShellEnv),
    ("SourceControl", TargetKind::SourceControl),
    ("GitHTTP", TargetKind::SourceControl),
    ("ProxyGitHTTP", TargetKind::SourceControl),
    ("SSHClient", TargetKind::SshClient),
    ("GitHubSSH", TargetKind::SshClient),
    ("ProxyGitHubSSH", TargetKind::SshClient),
];

impl TargetKind {
    pub fn from_name(name: &str) -> Result<Self> {
        let name = name.trim();
        TARGET_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, k)| *k)
            .ok_or_else(|| {
                let known: Vec<&str> = TARGET_NAMES.iter().map(|(n, _)| *n).collect();
                Error::new(
                    ErrorKind::UnknownTarget,
                    format!("unknown target '{name}' (known: {})", known.join(", ")),
                )
            })
    }

    pub fn canonical_name(self) -> &'static str {
        TARGET_NAMES
            .iter()
            .find(|(_, k)| *k == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    pub fn build(self, env: &TargetEnv) -> Result<Box<dyn Target>> {
        Ok(match self {
            TargetKind::ShellEnv => Box::new(shell::ShellEnvTarget::open(&env.bashrc)?),
            TargetKind::SourceControl => {
                Box::new(git::SourceControlTarget::new(git::GitScope::from_env(env)))
            }
            TargetKind::SshClient => Box::new(ssh::SshClientTarget::open(
                &env.ssh_config,
                env.ssh_host.clone(),
            )?),
        })
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Proxy,
    Clear,
}

const OPERATION_NAMES: &[(&str, Operation)] = &[
    ("init", Operation::Init),
    ("proxy", Operation::Proxy),
    ("clear", Operation::Clear),
];

impl Operation {
    pub fn from_name(name: &str) -> Result<Self> {
        OPERATION_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, op)| *op)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownOperation,
                    format!("unknown operation '{name}' (expected init, proxy or clear)"),
                )
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::Proxy => "proxy",
            Operation::Clear => "clear",
        }
    }

    pub fn apply(self, target: &mut dyn Target, params: &ProxyParams, ctx: &mut ExecCtx) -> Result<()> {
        match self {
            Operation::Init => target.init(ctx),
            Operation::Proxy => target.proxy(params, ctx),
            Operation::Clear => target.clear(ctx),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed subsystem.
///
/// `proxy` validates the parameters it needs before changing anything, so a
/// rejected call leaves the target untouched.
pub trait Target {
    fn kind(&self) -> TargetKind;
    fn init(&mut self, ctx: &mut ExecCtx) -> Result<()>;
    fn proxy(&mut self, params: &ProxyParams, ctx: &mut ExecCtx) -> Result<()>;
    fn clear(&mut self, ctx: &mut ExecCtx) -> Result<()>;
}

/// Resolved proxy endpoint, shared read-only by every target in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    pub ip: String,
    pub http_port: Option<i64>,
    pub socks_port: Option<i64>,
}

impl ProxyParams {
    pub fn require_ip(&self, who: TargetKind) -> Result<&str> {
        let ip = self.ip.trim();
        if ip.is_empty() {
            return Err(Error::new(
                ErrorKind::ParameterMissing,
                format!("{who}: proxy IP is required"),
            ));
        }
        Ok(ip)
    }

    pub fn require_http_port(&self, who: TargetKind) -> Result<u16> {
        require_port(self.http_port, "HTTPPort", who)
    }

    pub fn require_socks_port(&self, who: TargetKind) -> Result<u16> {
        require_port(self.socks_port, "SocksPort", who)
    }
}

fn require_port(v: Option<i64>, name: &str, who: TargetKind) -> Result<u16> {
    match v {
        Some(p) if p >= 1 => u16::try_from(p).map_err(|_| {
            Error::new(
                ErrorKind::ParameterMissing,
                format!("{who}: {name} {p} is out of range"),
            )
        }),
        Some(p) => Err(Error::new(
            ErrorKind::ParameterMissing,
            format!("{who}: {name} must be positive, got {p}"),
        )),
        None => Err(Error::new(
            ErrorKind::ParameterMissing,
            format!("{who}: {name} is required"),
        )),
    }
}

pub fn http_proxy_url(ip: &str, port: u16) -> String {
    format!("http://{ip}:{port}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshHost {
    pub host: String,
    pub host_name: String,
    pub user: String,
}

impl Default for SshHost {
    fn default() -> Self {
        Self {
            host: "github.com".into(),
            host_name: "github.com".into(),
            user: "git".into(),
        }
    }
}

/// Where each target keeps its settings.
#[derive(Debug, Clone)]
pub struct TargetEnv {
    pub bashrc: PathBuf,
    pub ssh_config: PathBuf,
    /// `None` means the user's global git config.
    pub git_config: Option<PathBuf>,
    pub ssh_host: SshHost,
}
