//! SSH client setup: endpoint parsing, host key scan, setup script rendering.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::core::config::{Config, SharingConfig};
use crate::core::errors::{Result, WstError};
use crate::platform::command;

const DEFAULT_TEMPLATE: &str = include_str!("ssh_setup_template.sh");

/// Host and port of an endpoint URL; the port defaults to 443 for `https`, else 80.
pub fn parse_endpoint_origin(origin: &str) -> Result<(String, u16)> {
    let url = Url::parse(origin.trim())
        .map_err(|error| WstError::invalid_input(format!("invalid origin {origin:?}: {error}")))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| WstError::invalid_input(format!("origin has no host: {origin:?}")))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    Ok((host.to_string(), port))
}

/// Source of the runtime's `known_hosts` material.
pub trait HostKeyScanner: Send + Sync {
    /// Raw `ssh-keyscan` style output for `host:port`.
    fn scan(&self, host: &str, port: u16) -> Result<String>;
}

/// `ssh-keyscan -p <port> <host>`
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeyscan;

impl HostKeyScanner for SshKeyscan {
    fn scan(&self, host: &str, port: u16) -> Result<String> {
        // ssh-keyscan exits non-zero when one key type fails but still prints the rest.
        let output = command::run("ssh-keyscan", ["-p", &port.to_string(), host], None)?;
        Ok(output.stdout)
    }
}

/// Last line of `output` containing `key_format`, or an empty string.
#[must_use]
pub fn pick_keyscan_entry(output: &str, key_format: &str) -> String {
    output
        .lines()
        .rfind(|line| line.contains(key_format))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// `setup_ssh_<host>-<port>[-<jumphost>].sh` with dots turned into dashes.
#[must_use]
pub fn download_file_name(host: &str, port: u16, jumphost: Option<&str>) -> String {
    let mut name = format!("setup_ssh_{}-{port}", dashed(host));
    if let Some(target) = jumphost.filter(|target| !target.is_empty()) {
        name.push('-');
        name.push_str(&dashed(target));
    }
    name.push_str(".sh");
    name
}

fn dashed(value: &str) -> String {
    value.to_lowercase().replace('.', "-")
}

/// One-line command that fetches and runs the token-authorized setup script.
#[must_use]
pub fn setup_command(origin: &str, setup_path: &str, token: &str, host: &str, port: u16) -> String {
    format!(
        "/bin/bash <(curl -s --insecure \"{}{setup_path}?token={token}&host={host}&port={port}\")",
        origin.trim_end_matches('/')
    )
}

/// Renders the client setup script for a runtime.
pub struct SetupScriptBuilder {
    runtime_key: String,
    template: String,
    jumphost_target: Option<String>,
    workspace_port: u16,
    key_format: String,
    scanner: Arc<dyn HostKeyScanner>,
}

impl SetupScriptBuilder {
    #[must_use]
    pub fn new(
        runtime_key: String,
        template: Option<String>,
        sharing: &SharingConfig,
        scanner: Arc<dyn HostKeyScanner>,
    ) -> Self {
        Self {
            runtime_key,
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            jumphost_target: sharing
                .ssh_jumphost_target
                .clone()
                .filter(|target| !target.trim().is_empty()),
            workspace_port: sharing.workspace_port,
            key_format: sharing.keyscan_key_format.clone(),
            scanner,
        }
    }

    /// Builder reading the runtime key and optional template from disk.
    pub fn from_config(config: &Config, scanner: Arc<dyn HostKeyScanner>) -> Result<Self> {
        let key_path = config.sharing.secret_file(&config.paths);
        let runtime_key = read_file(&key_path)?;
        let template = config
            .sharing
            .ssh_template_file
            .as_deref()
            .map(read_file)
            .transpose()?;
        Ok(Self::new(runtime_key, template, &config.sharing, scanner))
    }

    #[must_use]
    pub fn jumphost_target(&self) -> Option<&str> {
        self.jumphost_target.as_deref()
    }

    /// Script for clients reaching the workspace at `host:port`.
    ///
    /// With a jumphost target, `host:port` is the manager and the runtime is
    /// reached through it.
    pub fn render(&self, host: &str, port: u16) -> Result<String> {
        if host.trim().is_empty() {
            return Err(WstError::invalid_input("host must not be empty"));
        }

        let (runtime_host, runtime_port, config_name, known_host_name) = match &self.jumphost_target
        {
            Some(target) => (
                target.clone(),
                self.workspace_port,
                format!("workspace-{target}-{host}-{port}"),
                target.clone(),
            ),
            None => (
                host.to_string(),
                port,
                format!("workspace-{host}-{port}"),
                format!("[{host}]:{port}"),
            ),
        };

        // The local host key stands in for the runtime's.
        let known_host_entry = match self.scanner.scan("localhost", 22) {
            Ok(output) => {
                pick_keyscan_entry(&output, &self.key_format).replace("localhost", &known_host_name)
            }
            Err(error) => {
                eprintln!("[WST-SSH] host key scan failed: {error}");
                String::new()
            }
        };

        let mut template = self.template.clone();
        if self.jumphost_target.is_some() {
            template = template
                .replace("{HOSTNAME_MANAGER}", host)
                .replace("{PORT_MANAGER}", &port.to_string())
                .replace("#ProxyCommand", "ProxyCommand");
        } else {
            template = template
                .lines()
                .filter(|line| !line.trim_start().starts_with("#ProxyCommand"))
                .map(|line| format!("{line}\n"))
                .collect();
        }

        Ok(template
            .replace("{PRIVATE_KEY_RUNTIME}", self.runtime_key.trim_end())
            .replace("{HOSTNAME_RUNTIME}", &runtime_host)
            .replace("{RUNTIME_KNOWN_HOST_ENTRY}", &known_host_entry)
            .replace("{PORT_RUNTIME}", &runtime_port.to_string())
            .replace("{RUNTIME_CONFIG_NAME}", &config_name)
            .replace(
                "{RUNTIME_KEYSCAN_NAME}",
                &known_host_name.replace('[', "\\[").replace(']', "\\]"),
            ))
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| WstError::io(path, source))
}
