use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address;
use crate::error::{Error, ErrorKind, Result};
use crate::targets::{ProxyParams, SshHost, TargetEnv};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "HTTPPort", default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i64>,
    #[serde(rename = "SocksPort", default, skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    #[serde(rename = "Bashrc", skip_serializing_if = "Option::is_none")]
    pub bashrc: Option<String>,
    #[serde(rename = "SSHConfig", skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<String>,
    /// When set, git settings go to this file instead of the global config.
    #[serde(rename = "GitConfig", skip_serializing_if = "Option::is_none")]
    pub git_config: Option<String>,
}

fn default_ssh_host() -> String {
    "github.com".into()
}

fn default_ssh_user() -> String {
    "git".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshHostConfig {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "HostName")]
    pub host_name: String,
    #[serde(rename = "User")]
    pub user: String,
}

impl Default for SshHostConfig {
    fn default() -> Self {
        Self {
            host: default_ssh_host(),
            host_name: default_ssh_host(),
            user: default_ssh_user(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEntry {
    pub target: String,
    pub ops: String,
}

/// Target -> operation list, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    entries: Vec<PipelineEntry>,
}

impl Pipeline {
    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    pub fn push(&mut self, target: impl Into<String>, ops: impl Into<String>) -> Result<()> {
        let target = target.into();
        if self.entries.iter().any(|e| e.target == target) {
            return Err(Error::new(
                ErrorKind::Recipe,
                format!("duplicate pipeline target '{target}'"),
            ));
        }
        self.entries.push(PipelineEntry {
            target,
            ops: ops.into(),
        });
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Pipeline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PipelineVisitor;

        impl<'de> Visitor<'de> for PipelineVisitor {
            type Value = Pipeline;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of target name to comma-separated operations")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Pipeline, A::Error> {
                let mut out = Pipeline::default();
                while let Some((target, ops)) = map.next_entry::<String, String>()? {
                    out.push(target, ops).map_err(de::Error::custom)?;
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(PipelineVisitor)
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for e in &self.entries {
            map.serialize_entry(&e.target, &e.ops)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(rename = "Network")]
    pub network: NetworkConfig,
    #[serde(rename = "Files", default)]
    pub files: FilesConfig,
    #[serde(rename = "SSHHost", default)]
    pub ssh_host: SshHostConfig,
    #[serde(rename = "Pipeline")]
    pub pipeline: Pipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeFormat {
    Json,
    Toml,
}

impl RecipeFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => RecipeFormat::Toml,
            _ => RecipeFormat::Json,
        }
    }
}

pub fn parse_recipe(raw: &str, format: RecipeFormat) -> Result<Recipe> {
    let recipe: Recipe = match format {
        RecipeFormat::Json => serde_json::from_str(raw)?,
        RecipeFormat::Toml => toml::from_str(raw)?,
    };
    Ok(recipe)
}

#[derive(Debug, Clone)]
pub struct RecipeDoc {
    pub path: PathBuf,
    pub recipe: Recipe,
}

impl RecipeDoc {
    fn base_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    /// Address and ports with the client placeholder substituted.
    pub fn proxy_params<F>(&self, descriptor: F) -> Result<ProxyParams>
    where
        F: FnOnce() -> Option<String>,
    {
        let net = &self.recipe.network;
        Ok(ProxyParams {
            ip: address::expand_ip(&net.ip, descriptor)?,
            http_port: net.http_port,
            socks_port: net.socks_port,
        })
    }

    /// Address and ports for plans that never run `proxy`. The client
    /// descriptor is not read; an address that needs it is left empty.
    pub fn unresolved_params(&self) -> ProxyParams {
        let net = &self.recipe.network;
        let ip = if net.ip.contains(address::SSH_CLIENT_PLACEHOLDER) {
            String::new()
        } else {
            net.ip.trim().to_string()
        };
        ProxyParams {
            ip,
            http_port: net.http_port,
            socks_port: net.socks_port,
        }
    }

    /// Managed file locations, defaulting to the user's home directory.
    pub fn target_env(&self) -> Result<TargetEnv> {
        let files = &self.recipe.files;
        let bashrc = match files.bashrc.as_deref() {
            Some(p) => self.resolve_path(p)?,
            None => home_dir()?.join(".bashrc"),
        };
        let ssh_config = match files.ssh_config.as_deref() {
            Some(p) => self.resolve_path(p)?,
            None => home_dir()?.join(".ssh").join("config"),
        };
        let git_config = files
            .git_config
            .as_deref()
            .map(|p| self.resolve_path(p))
            .transpose()?;

        let host = &self.recipe.ssh_host;
        Ok(TargetEnv {
            bashrc,
            ssh_config,
            git_config,
            ssh_host: SshHost {
                host: host.host.trim().to_string(),
                host_name: host.host_name.trim().to_string(),
                user: host.user.trim().to_string(),
            },
        })
    }

    // `~/` expands to the home directory; relative paths are taken from the
    // recipe's directory.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::Recipe, "managed file path is empty"));
        }
        if raw == "~" {
            return home_dir();
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            return Ok(home_dir()?.join(rest));
        }
        let p = PathBuf::from(raw);
        if p.is_absolute() {
            Ok(p)
        } else {
            Ok(self.base_dir().join(p))
        }
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        Error::new(
            ErrorKind::Recipe,
            "unable to resolve the home directory; set HOME or list paths under Files",
        )
    })
}

pub fn load(path: &Path) -> Result<RecipeDoc> {
    let data = fs::read_to_string(path).map_err(|e| {
        Error::new(
            ErrorKind::Io,
            format!("failed to read recipe {}: {e}", path.display()),
        )
    })?;
    let recipe = parse_recipe(&data, RecipeFormat::from_path(path))
        .map_err(|e| e.context(format!("invalid recipe {}", path.display())))?;
    Ok(RecipeDoc {
        path: path.to_path_buf(),
        recipe,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Network": {"IP": "<SSHClient>", "HTTPPort": 10809, "SocksPort": 10808},
        "Pipeline": {"SSHClient": "init, proxy", "ShellEnv": "proxy", "GitHTTP": "clear"}
    }"#;

    fn doc(raw: &str, format: RecipeFormat) -> RecipeDoc {
        RecipeDoc {
            path: PathBuf::from("/etc/qps/recipe.json"),
            recipe: parse_recipe(raw, format).expect("parse recipe"),
        }
    }

    #[test]
    fn pipeline_keeps_declaration_order() {
        let d = doc(SAMPLE, RecipeFormat::Json);
        let targets: Vec<&str> = d
            .recipe
            .pipeline
            .entries()
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(targets, vec!["SSHClient", "ShellEnv", "GitHTTP"]);
        assert_eq!(d.recipe.pipeline.entries()[0].ops, "init, proxy");
    }

    #[test]
    fn toml_recipe_keeps_declaration_order() {
        let raw = r#"
[Network]
IP = "10.0.0.5"
HTTPPort = 8080

[Pipeline]
ShellEnv = "init,proxy"
GitHTTP = "proxy"
"#;
        let d = doc(raw, RecipeFormat::Toml);
        let targets: Vec<&str> = d
            .recipe
            .pipeline
            .entries()
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(targets, vec!["ShellEnv", "GitHTTP"]);
        assert_eq!(d.recipe.network.socks_port, None);
    }

    #[test]
    fn rejects_duplicate_targets() {
        let raw = r#"{"Network": {"IP": "1.2.3.4"}, "Pipeline": {"ShellEnv": "init", "ShellEnv": "proxy"}}"#;
        let err = parse_recipe(raw, RecipeFormat::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recipe);
        assert!(err.to_string().contains("duplicate pipeline target"), "unexpected err: {err}");
    }

    #[test]
    fn missing_network_is_a_recipe_error() {
        let err = parse_recipe(r#"{"Pipeline": {}}"#, RecipeFormat::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recipe);
    }

    #[test]
    fn params_substitute_client_address() {
        let d = doc(SAMPLE, RecipeFormat::Json);
        let params = d
            .proxy_params(|| Some("203.0.113.7 54321 10.0.0.1 22".into()))
            .unwrap();
        assert_eq!(params.ip, "203.0.113.7");
        assert_eq!(params.http_port, Some(10809));
        assert_eq!(params.socks_port, Some(10808));
    }

    #[test]
    fn unresolved_params_leave_placeholder_address_empty() {
        let d = doc(
            r#"{"Network": {"IP": "<SSHClient>", "HTTPPort": 8080}, "Pipeline": {}}"#,
            RecipeFormat::Json,
        );
        let params = d.unresolved_params();
        assert_eq!(params.ip, "");
        assert_eq!(params.http_port, Some(8080));

        let d = doc(r#"{"Network": {"IP": " 10.0.0.5 "}, "Pipeline": {}}"#, RecipeFormat::Json);
        assert_eq!(d.unresolved_params().ip, "10.0.0.5");
    }

    #[test]
    fn paths_resolve_relative_to_recipe() {
        let raw = r#"{
            "Network": {"IP": "1.2.3.4"},
            "Files": {"Bashrc": "home/.bashrc", "SSHConfig": "/tmp/ssh_config", "GitConfig": "gitconfig"},
            "SSHHost": {"Host": "gitlab", "HostName": "gitlab.com"},
            "Pipeline": {}
        }"#;
        let env = doc(raw, RecipeFormat::Json).target_env().unwrap();
        assert_eq!(env.bashrc, PathBuf::from("/etc/qps/home/.bashrc"));
        assert_eq!(env.ssh_config, PathBuf::from("/tmp/ssh_config"));
        assert_eq!(env.git_config, Some(PathBuf::from("/etc/qps/gitconfig")));
        assert_eq!(env.ssh_host.host, "gitlab");
        assert_eq!(env.ssh_host.host_name, "gitlab.com");
        assert_eq!(env.ssh_host.user, "git");
    }

    #[test]
    fn resolved_recipe_serializes_in_order() {
        let d = doc(SAMPLE, RecipeFormat::Json);
        let out = serde_json::to_string(&d.recipe.pipeline).unwrap();
        assert_eq!(
            out,
            r#"{"SSHClient":"init, proxy","ShellEnv":"proxy","GitHTTP":"clear"}"#
        );
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(RecipeFormat::from_path(Path::new("r.TOML")), RecipeFormat::Toml);
        assert_eq!(RecipeFormat::from_path(Path::new("r.json")), RecipeFormat::Json);
        assert_eq!(RecipeFormat::from_path(Path::new("recipe")), RecipeFormat::Json);
    }
}
