use std::path::Path;

use crate::error::Result;
use crate::executor::ExecCtx;
use crate::mutator::ConfigMutator;
use crate::region::Markers;
use crate::targets::{ProxyParams, Target, TargetKind, http_proxy_url};

pub const SHELL_REGION_LEN: usize = 2;

/// `http_proxy` / `https_proxy` exports in the shell startup file.
///
/// Both variables point at the HTTP endpoint: client tools cannot validate the
/// proxy's TLS certificate, so HTTPS traffic is tunnelled through plain HTTP.
pub struct ShellEnvTarget {
    rc: ConfigMutator,
}

impl ShellEnvTarget {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            rc: ConfigMutator::open(path, Markers::default(), SHELL_REGION_LEN)?,
        })
    }

    pub fn mutator(&self) -> &ConfigMutator {
        &self.rc
    }

    pub fn proxy_lines(ip: &str, port: u16) -> [String; SHELL_REGION_LEN] {
        let url = http_proxy_url(ip, port);
        [
            format!("export http_proxy={url}"),
            format!("export https_proxy={url}"),
        ]
    }

    fn reload_notice(&self, ctx: &ExecCtx) {
        ctx.log(&format!(
            "run `source {}` or open a new session to apply",
            self.rc.path().display()
        ));
    }
}

impl Target for ShellEnvTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::ShellEnv
    }

    fn init(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        self.rc.initialize()?;
        ctx.log(&format!("managed region added to {}", self.rc.path().display()));
        Ok(())
    }

    fn proxy(&mut self, params: &ProxyParams, ctx: &mut ExecCtx) -> Result<()> {
        let ip = params.require_ip(self.kind())?;
        let port = params.require_http_port(self.kind())?;

        self.rc.set_lines(&Self::proxy_lines(ip, port))?;
        ctx.log(&format!("http(s)_proxy -> {}", http_proxy_url(ip, port)));
        self.reload_notice(ctx);
        Ok(())
    }

    fn clear(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        self.rc.clear_lines()?;
        ctx.log("proxy exports cleared");
        self.reload_notice(ctx);
        Ok(())
    }
}
