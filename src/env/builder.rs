use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::config::ApiDiffConfig;

use super::{key_variable_name, ApiEnv, KeyStore, Protocol};

/// Per-side flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct EnvArgs {
    /// Named host entry, `NAME` or `NAME=ARG` for entries that take an argument.
    pub env: Option<String>,
    pub host: Option<String>,
    pub protocol: Option<Protocol>,
    pub key: Option<String>,
    pub key_env: Option<String>,
    pub key_type: Option<String>,
}

impl EnvArgs {
    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.host.is_none()
    }
}

pub fn build_api_env(
    args: &EnvArgs,
    config: &ApiDiffConfig,
    keys: &KeyStore,
    extra_params: &BTreeMap<String, String>,
) -> Result<ApiEnv> {
    let mut host = None;
    let mut protocol = None;
    let mut key_env = None;
    let mut key_type = None;

    if let Some(requested) = args.env.as_deref() {
        let (name, arg) = match requested.split_once('=') {
            Some((name, arg)) => (name, Some(arg)),
            None => (requested, None),
        };
        let (entry_name, entry) = config.find_host(name).ok_or_else(|| {
            let known = config.hosts.keys().cloned().collect::<Vec<_>>().join(", ");
            anyhow!("Unknown env {name}, expected one of: {known}")
        })?;

        let mut entry_host = entry.host.clone();
        if entry.takes_arg {
            let Some(arg) = arg.filter(|a| !a.is_empty()) else {
                bail!("env {entry_name} takes an argument, use --env {entry_name}=VALUE");
            };
            entry_host = entry_host.replace(&entry_name.to_uppercase(), arg);
        }

        host = Some(entry_host);
        protocol = entry.protocol;
        key_env = Some(
            entry
                .key_env
                .clone()
                .unwrap_or_else(|| entry_name.to_string()),
        );
        key_type = entry.key_type.clone().or_else(|| config.key_types.first().cloned());
    }

    if let Some(explicit) = &args.host {
        host = Some(explicit.clone());
    }
    if args.protocol.is_some() {
        protocol = args.protocol;
    }
    if args.key_env.is_some() {
        key_env = args.key_env.clone();
    }
    if args.key_type.is_some() {
        key_type = args.key_type.clone();
    }

    let Some(mut host) = host.filter(|h| !h.is_empty()) else {
        bail!("Could not find host via arguments specified: {args:?}");
    };

    if host.starts_with("http://") || host.starts_with("https://") {
        let url = Url::parse(&host).with_context(|| format!("parsing host url {host}"))?;
        let authority = match (url.host_str(), url.port()) {
            (Some(name), Some(port)) => format!("{name}:{port}"),
            (Some(name), None) => name.to_string(),
            (None, _) => bail!("host url {host} has no host"),
        };
        if args.protocol.is_none() {
            protocol = Some(url.scheme().parse()?);
        }
        host = authority;
    }

    let mut key = args.key.clone();
    if key.is_none() && config.requires_key() {
        let variable = key_variable_name(config.name.as_deref(), key_env.as_deref(), key_type.as_deref());
        key = Some(keys.lookup(&variable).ok_or_else(|| {
            anyhow!("No key found for {variable} in .env and --key not specified")
        })?);
    }

    Ok(ApiEnv {
        protocol: protocol.unwrap_or_default(),
        host,
        key,
        key_env,
        key_type,
        extra_params: extra_params.clone(),
    })
}
