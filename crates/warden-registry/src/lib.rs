//! Federates heterogeneous tool-server catalog APIs into one uniform
//! [`ServerEntry`] stream.
//!
//! Each registry declares a `protocol`; [`search_servers`] dispatches to the
//! matching parser, backfills missing URLs, filters, clamps the result
//! limit, and — when a guesser is supplied — enriches entries with
//! repository information in one batched pass.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use warden_guess::Guesser;
use warden_types::{RegistryEntry, ServerEntry};

/// Fixed HTTP timeout for every registry fetch.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default result limit when `limit` is absent or non-positive.
pub const DEFAULT_LIMIT: i64 = 10;
/// Ceiling a caller-supplied limit is clamped to.
pub const MAX_LIMIT: i64 = 50;

const USER_AGENT: &str = concat!("warden-registry/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP client for federated catalog APIs: one timeout-builder
/// client reused across every registry's servers endpoint.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::blocking::Client,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client }
    }

    fn fetch_json(&self, url: &str) -> Result<Value> {
        tracing::debug!(url, "fetching registry catalog");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .with_context(|| format!("failed to fetch registry catalog from {url}"))?;
        if !response.status().is_success() {
            tracing::warn!(url, status = %response.status(), "registry catalog fetch failed");
            anyhow::bail!("unexpected status fetching {url}: {}", response.status());
        }
        response
            .json::<Value>()
            .with_context(|| format!("failed to parse registry catalog from {url}"))
    }

    /// Resolve `registry`'s servers endpoint, dispatch by protocol, filter,
    /// clamp, and optionally enrich via `guesser`.
    pub fn search_servers(
        &self,
        registry: &RegistryEntry,
        tag: &str,
        query: &str,
        limit: i64,
        guesser: Option<&Guesser>,
    ) -> Result<Vec<ServerEntry>> {
        let body = self.fetch_json(&registry.servers_url)?;
        let mut entries = dispatch(&registry.protocol, &body, registry);
        tracing::info!(
            registry = registry.name.as_str(),
            protocol = registry.protocol.as_str(),
            count = entries.len(),
            "dispatched registry catalog"
        );
        entries = filter_servers(&entries, tag, query);

        let clamped = clamp_limit(limit);
        entries.truncate(clamped as usize);

        if let Some(guesser) = guesser {
            apply_batch_repository_guessing(&mut entries, guesser);
        }

        Ok(entries)
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

/// `filter_servers(S, "", "") = S`; otherwise case-insensitive substring
/// containment on name or description. `tag` is accepted for forward
/// compatibility but not yet compared at the entry level.
pub fn filter_servers(servers: &[ServerEntry], _tag: &str, query: &str) -> Vec<ServerEntry> {
    if query.is_empty() {
        return servers.to_vec();
    }
    let needle = query.to_lowercase();
    servers
        .iter()
        .filter(|s| {
            s.name.to_lowercase().contains(&needle)
                || s.description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn dispatch(protocol: &str, body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    match protocol {
        "modelcontextprotocol/registry" => parse_modelcontextprotocol_registry(body, registry),
        "custom/mcprun" => parse_mcprun(body, registry),
        "custom/pulse" => parse_pulse(body, registry),
        "custom/mcpstore" => parse_mcpstore(body, registry),
        "custom/docker" => parse_docker(body, registry),
        "custom/fleur" => parse_fleur(body, registry),
        "custom/apitracker" => parse_apitracker(body, registry),
        "custom/apify" => parse_apify(body, registry),
        "mcp/v0" => parse_mcp_v0(body, registry),
        "custom/remote" => parse_remote(body, registry),
        _ => parse_default(body, registry),
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn array_at<'a>(body: &'a Value, keys: &[&str]) -> Vec<&'a Value> {
    for key in keys {
        if let Some(arr) = body.get(*key).and_then(Value::as_array) {
            return arr.iter().collect();
        }
    }
    body.as_array().map(|a| a.iter().collect()).unwrap_or_default()
}

fn base_entry(id: String, name: String, registry: &RegistryEntry) -> ServerEntry {
    ServerEntry {
        id,
        name,
        description: None,
        url: String::new(),
        install_cmd: None,
        connect_url: None,
        updated_at: None,
        created_at: None,
        registry: registry.id.clone(),
        source_code_url: None,
        repository_info: None,
    }
}

/// `servers` or `data`, or a root array; each object's `id`/`name`,
/// `description`, `repository.url`.
fn parse_modelcontextprotocol_registry(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers", "data"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id").or_else(|| str_field(item, "name"))?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "description");
            entry.source_code_url = item
                .get("repository")
                .and_then(|r| str_field(r, "url"));
            Some(entry)
        })
        .collect()
}

/// Root array of objects carrying `slug` and optional `meta.description`.
fn parse_mcprun(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    body.as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let slug = str_field(item, "slug")?;
            let mut entry = base_entry(slug.clone(), slug.clone(), registry);
            entry.description = item.get("meta").and_then(|m| str_field(m, "description"));
            entry.url = format!("https://{}.mcp.run/mcp/", slug.replace('/', "-"));
            Some(entry)
        })
        .collect()
}

/// Object with a `servers` array; install-command/connect-url synthesis.
fn parse_pulse(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers"])
        .into_iter()
        .filter_map(|item| {
            let name = str_field(item, "name")?;
            let id = name.clone();
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "short_description")
                .or_else(|| str_field(item, "EXPERIMENTAL_ai_generated_description"))
                .map(|d| truncate_chars(&d, 300));

            let package_registry = str_field(item, "package_registry");
            let package_name = str_field(item, "package_name");
            if let (Some(registry_kind), Some(package_name)) = (package_registry, package_name) {
                entry.install_cmd = Some(match registry_kind.as_str() {
                    "npm" => format!("npx -y {package_name}"),
                    "pypi" => format!("pipx run {package_name}"),
                    "docker" => format!("docker run -i --rm {package_name}"),
                    _ => format!("{registry_kind} {package_name}"),
                });
            }

            if let Some(remotes) = item.get("remotes").and_then(Value::as_array) {
                entry.connect_url = remotes
                    .iter()
                    .find_map(|r| str_field(r, "url_direct"));
            }
            entry.source_code_url = str_field(item, "source_code_url");
            Some(entry)
        })
        .collect()
}

/// Object with a `servers` array; fields `id`, `name`, `description`,
/// `install_url`.
fn parse_mcpstore(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "description");
            entry.url = str_field(item, "install_url").unwrap_or_default();
            Some(entry)
        })
        .collect()
}

/// Docker Hub style `results` array; `name`, `short_description`,
/// `repo_url`/`slug`.
fn parse_docker(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["results"])
        .into_iter()
        .filter_map(|item| {
            let name = str_field(item, "name")?;
            let mut entry = base_entry(name.clone(), name.clone(), registry);
            entry.description = str_field(item, "short_description");
            entry.url = str_field(item, "repo_url")
                .unwrap_or_else(|| format!("https://hub.docker.com/r/{name}"));
            Some(entry)
        })
        .collect()
}

/// `apps` array; `id`, `title`, `description`, `homepage`.
fn parse_fleur(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["apps"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "title").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "description");
            entry.url = str_field(item, "homepage").unwrap_or_default();
            Some(entry)
        })
        .collect()
}

/// `items` array; `id`, `name`, `summary`, `endpoint`.
fn parse_apitracker(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["items"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "summary");
            entry.url = str_field(item, "endpoint").unwrap_or_default();
            Some(entry)
        })
        .collect()
}

/// `data.items` array; `id`, `name`, `description`, `url`.
fn parse_apify(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    let items = body
        .get("data")
        .map(|d| array_at(d, &["items"]))
        .unwrap_or_default();
    items
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "description");
            entry.url = str_field(item, "url").unwrap_or_default();
            Some(entry)
        })
        .collect()
}

/// Azure demo protocol: `servers[]` with `id/name/description`,
/// `repository.url`, `version_detail.version`/`release_date`.
fn parse_mcp_v0(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            let description = str_field(item, "description");
            entry.source_code_url = item.get("repository").and_then(|r| str_field(r, "url"));

            let version_detail = item.get("version_detail");
            let version = version_detail.and_then(|v| str_field(v, "version"));
            entry.description = match (description, &version) {
                (Some(d), Some(v)) => Some(format!("{d} (v{v})")),
                (Some(d), None) => Some(d),
                (None, Some(v)) => Some(format!("v{v}")),
                (None, None) => None,
            };
            entry.updated_at = version_detail
                .and_then(|v| str_field(v, "release_date"))
                .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
                .map(|d| d.with_timezone(&Utc));
            Some(entry)
        })
        .collect()
}

/// `servers[]` with `id, name, url, auth`; description synthesized from
/// the auth mode.
fn parse_remote(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id")?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.url = str_field(item, "url").unwrap_or_default();
            entry.description = match str_field(item, "auth").as_deref() {
                Some("oauth") => Some("OAuth-protected remote server".to_string()),
                Some("open") => Some("Open remote server".to_string()),
                Some(other) => Some(format!("Remote server ({other} auth)")),
                None => None,
            };
            Some(entry)
        })
        .collect()
}

/// Best-effort decode for unrecognized protocols: never returns an error,
/// always a possibly-empty list.
fn parse_default(body: &Value, registry: &RegistryEntry) -> Vec<ServerEntry> {
    array_at(body, &["servers", "data", "items", "results"])
        .into_iter()
        .filter_map(|item| {
            let id = str_field(item, "id").or_else(|| str_field(item, "name"))?;
            let name = str_field(item, "name").unwrap_or_else(|| id.clone());
            let mut entry = base_entry(id, name, registry);
            entry.description = str_field(item, "description");
            entry.url = str_field(item, "url").unwrap_or_default();
            Some(entry)
        })
        .collect()
}

/// Collect distinct GitHub URLs carried by `entries` (via `url` or
/// `source_code_url`), batch-guess them, and splice repository information
/// back onto every entry that shared a URL.
fn apply_batch_repository_guessing(entries: &mut [ServerEntry], guesser: &Guesser) {
    let mut urls: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for entry in entries.iter() {
        for candidate in [entry.source_code_url.as_deref(), Some(entry.url.as_str())]
            .into_iter()
            .flatten()
        {
            if candidate.starts_with("https://github.com/") && seen.insert(candidate.to_string()) {
                urls.push(candidate.to_string());
            }
        }
    }
    if urls.is_empty() {
        return;
    }
    tracing::debug!(count = urls.len(), "batch-guessing repository info for registry entries");

    let cancelled = AtomicBool::new(false);
    let results = guesser.guess_batch(&urls, &cancelled);
    let by_url: std::collections::HashMap<&str, &warden_types::GuessResult> =
        urls.iter().map(String::as_str).zip(results.iter()).collect();

    for entry in entries.iter_mut() {
        let github_url = entry
            .source_code_url
            .as_deref()
            .filter(|u| u.starts_with("https://github.com/"))
            .or_else(|| Some(entry.url.as_str()).filter(|u| u.starts_with("https://github.com/")));
        let Some(github_url) = github_url else { continue };
        let Some(result) = by_url.get(github_url) else { continue };
        if let Some(npm) = &result.npm {
            if npm.exists && entry.install_cmd.is_none() {
                entry.install_cmd = Some(format!("npm install {}", npm.package_name));
            }
        }
        entry.repository_info = Some((*result).clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(protocol: &str) -> RegistryEntry {
        RegistryEntry {
            id: "reg-1".to_string(),
            name: "Test Registry".to_string(),
            description: None,
            url: "https://registry.example.com".to_string(),
            servers_url: "https://registry.example.com/servers".to_string(),
            tags: vec![],
            protocol: protocol.to_string(),
        }
    }

    #[test]
    fn clamp_limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(0), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(-5), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(1000), MAX_LIMIT);
    }

    #[test]
    fn filter_servers_identity_on_empty_query() {
        let servers = vec![base_entry("a".into(), "Alpha".into(), &registry("x"))];
        let filtered = filter_servers(&servers, "", "");
        assert_eq!(filtered.len(), servers.len());
    }

    #[test]
    fn filter_servers_matches_case_insensitive_substring() {
        let reg = registry("x");
        let mut a = base_entry("a".into(), "Alpha Tool".into(), &reg);
        a.description = Some("does things".to_string());
        let mut b = base_entry("b".into(), "Beta".into(), &reg);
        b.description = Some("handles ALPHA workloads".to_string());
        let c = base_entry("c".into(), "Gamma".into(), &reg);

        let filtered = filter_servers(&[a, b, c], "", "alpha");
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn parse_modelcontextprotocol_registry_reads_servers_array() {
        let reg = registry("modelcontextprotocol/registry");
        let body = json!({
            "servers": [
                {"id": "s1", "name": "Server One", "description": "desc", "repository": {"url": "https://github.com/acme/s1"}}
            ]
        });
        let entries = parse_modelcontextprotocol_registry(&body, &reg);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Server One");
        assert_eq!(
            entries[0].source_code_url.as_deref(),
            Some("https://github.com/acme/s1")
        );
    }

    #[test]
    fn parse_mcprun_builds_url_from_slug() {
        let reg = registry("custom/mcprun");
        let body = json!([{"slug": "acme/tool", "meta": {"description": "a tool"}}]);
        let entries = parse_mcprun(&body, &reg);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://acme-tool.mcp.run/mcp/");
    }

    #[test]
    fn parse_pulse_builds_install_cmd_and_connect_url() {
        let reg = registry("custom/pulse");
        let body = json!({
            "servers": [{
                "name": "pulse-tool",
                "short_description": "a short description",
                "package_registry": "npm",
                "package_name": "pulse-tool",
                "remotes": [{"url_direct": "https://pulse.example.com/connect"}]
            }]
        });
        let entries = parse_pulse(&body, &reg);
        assert_eq!(entries[0].install_cmd.as_deref(), Some("npx -y pulse-tool"));
        assert_eq!(
            entries[0].connect_url.as_deref(),
            Some("https://pulse.example.com/connect")
        );
    }

    #[test]
    fn parse_remote_synthesizes_description_from_auth() {
        let reg = registry("custom/remote");
        let body = json!({"servers": [{"id": "r1", "name": "Remote", "url": "https://r.example.com", "auth": "oauth"}]});
        let entries = parse_remote(&body, &reg);
        assert_eq!(
            entries[0].description.as_deref(),
            Some("OAuth-protected remote server")
        );
    }

    #[test]
    fn parse_default_never_panics_on_unknown_protocol() {
        let reg = registry("custom/unknown-thing");
        let body = json!({"items": [{"id": "x1", "name": "X"}]});
        let entries = parse_default(&body, &reg);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn dispatch_falls_back_to_default_for_unrecognized_protocol() {
        let reg = registry("custom/something-new");
        let body = json!({"data": [{"id": "z", "name": "Z"}]});
        let entries = dispatch(&reg.protocol, &body, &reg);
        assert_eq!(entries.len(), 1);
    }
}
