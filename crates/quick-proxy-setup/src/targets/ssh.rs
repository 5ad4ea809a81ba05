use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::executor::ExecCtx;
use crate::mutator::ConfigMutator;
use crate::region::Markers;
use crate::targets::{ProxyParams, SshHost, Target, TargetKind};

pub const SSH_REGION_LEN: usize = 4;

/// Routes one host's SSH traffic through the SOCKS endpoint with a
/// `ProxyCommand` block in the SSH client config.
pub struct SshClientTarget {
    config: ConfigMutator,
    host: SshHost,
}

impl SshClientTarget {
    /// Opens the config file, creating it (and `~/.ssh`) when missing.
    pub fn open(path: &Path, host: SshHost) -> Result<Self> {
        Ok(Self {
            config: ConfigMutator::open_or_create(path, Markers::default(), SSH_REGION_LEN)?,
            host,
        })
    }

    pub fn mutator(&self) -> &ConfigMutator {
        &self.config
    }

    pub fn proxy_lines(host: &SshHost, ip: &str, socks_port: u16) -> [String; SSH_REGION_LEN] {
        [
            format!("Host {}", host.host),
            format!("HostName {}", host.host_name),
            format!("User {}", host.user),
            format!("ProxyCommand nc -v -x {ip}:{socks_port} %h %p"),
        ]
    }

    fn check_host(&self) -> Result<()> {
        for (name, v) in [
            ("Host", &self.host.host),
            ("HostName", &self.host.host_name),
            ("User", &self.host.user),
        ] {
            if v.trim().is_empty() {
                return Err(Error::new(
                    ErrorKind::ParameterMissing,
                    format!("{}: SSHHost.{name} is empty", self.kind()),
                ));
            }
        }
        Ok(())
    }
}

impl Target for SshClientTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::SshClient
    }

    fn init(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        self.config.initialize()?;
        ctx.log(&format!(
            "managed region added to {}",
            self.config.path().display()
        ));
        Ok(())
    }

    fn proxy(&mut self, params: &ProxyParams, ctx: &mut ExecCtx) -> Result<()> {
        let ip = params.require_ip(self.kind())?;
        let port = params.require_socks_port(self.kind())?;
        self.check_host()?;

        let lines = Self::proxy_lines(&self.host, ip, port);
        self.config.set_lines(&lines)?;
        ctx.log(&format!(
            "ssh {}@{} -> socks5 {ip}:{port}",
            self.host.user, self.host.host
        ));
        Ok(())
    }

    fn clear(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        self.config.clear_lines()?;
        ctx.log(&format!("proxy block for {} cleared", self.host.host));
        Ok(())
    }
}
