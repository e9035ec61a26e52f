//! Repository guesser: maps a GitHub URL to a scoped npm package and
//! probes the registry for its existence.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use warden_cache::Cache;
use warden_types::{GuessResult, RepositoryInfo};

/// Fixed HTTP timeout for both the registry lookup and the npm probe.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifetime of a cached guess, positive or negative.
pub const REPO_GUESS_TTL: ChronoDuration = ChronoDuration::hours(6);
/// Default worker-pool size for batched guessing.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

const NPM_REGISTRY_BASE: &str = "https://registry.npmjs.org";
const USER_AGENT: &str = concat!("warden-guess/", env!("CARGO_PKG_VERSION"));

fn github_url_owner_repo(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("https://github.com/")?;
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn scoped_package_name(owner: &str, repo: &str) -> String {
    format!("@{owner}/{repo}")
}

fn escape_scoped_name(name: &str) -> String {
    name.replace('/', "%2f")
}

fn cache_key(package_name: &str) -> String {
    format!("npm:{package_name}")
}

#[derive(serde::Deserialize)]
struct NpmPackageResponse {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "dist-tags")]
    dist_tags: Option<NpmDistTags>,
}

#[derive(serde::Deserialize)]
struct NpmDistTags {
    latest: Option<String>,
}

/// Probes the npm registry for GitHub-derived package names, caching every
/// outcome (positive, negative, and error) so repeated misses don't thrash
/// the network.
pub struct Guesser {
    client: reqwest::blocking::Client,
    cache: Cache,
    pool_size: usize,
}

impl Guesser {
    pub fn new(cache_db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_pool_size(cache_db_path, DEFAULT_WORKER_POOL_SIZE)
    }

    pub fn with_pool_size(cache_db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build npm registry HTTP client")?;
        let cache = Cache::open_with_ttl(cache_db_path, REPO_GUESS_TTL)
            .context("failed to open guesser cache")?;
        Ok(Self { client, cache, pool_size })
    }

    /// Guess the repository type for one GitHub URL. Non-GitHub URLs yield
    /// an empty result without any network call.
    pub fn guess(&self, url: &str) -> GuessResult {
        let Some((owner, repo)) = github_url_owner_repo(url) else {
            return GuessResult::default();
        };
        let package_name = scoped_package_name(&owner, &repo);
        let key = cache_key(&package_name);

        if let Ok(record) = self.cache.get(&key) {
            if let Ok(info) = serde_json::from_str::<RepositoryInfo>(&record.full_content) {
                return GuessResult { npm: Some(info) };
            }
        }

        let info = self.probe_npm(&package_name);
        self.cache_result(&key, &info);
        GuessResult { npm: Some(info) }
    }

    fn probe_npm(&self, package_name: &str) -> RepositoryInfo {
        let url = format!("{NPM_REGISTRY_BASE}/{}", escape_scoped_name(package_name));
        match self.client.get(&url).send() {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<NpmPackageResponse>() {
                    Ok(body) => RepositoryInfo {
                        kind: "npm".to_string(),
                        package_name: package_name.to_string(),
                        version: body.dist_tags.and_then(|t| t.latest),
                        description: body.description,
                        install_cmd: Some(format!("npm install {package_name}")),
                        url: Some(format!("https://www.npmjs.com/package/{package_name}")),
                        exists: true,
                        error: None,
                    },
                    Err(e) => RepositoryInfo {
                        kind: "npm".to_string(),
                        package_name: package_name.to_string(),
                        version: None,
                        description: None,
                        install_cmd: None,
                        url: None,
                        exists: false,
                        error: Some(format!("failed to parse npm response: {e}")),
                    },
                }
            }
            Ok(resp) if resp.status().as_u16() == 404 => RepositoryInfo {
                kind: "npm".to_string(),
                package_name: package_name.to_string(),
                version: None,
                description: None,
                install_cmd: None,
                url: None,
                exists: false,
                error: None,
            },
            Ok(resp) => RepositoryInfo {
                kind: "npm".to_string(),
                package_name: package_name.to_string(),
                version: None,
                description: None,
                install_cmd: None,
                url: None,
                exists: false,
                error: Some(format!("HTTP {}: {}", resp.status().as_u16(), resp.status())),
            },
            Err(e) => RepositoryInfo {
                kind: "npm".to_string(),
                package_name: package_name.to_string(),
                version: None,
                description: None,
                install_cmd: None,
                url: None,
                exists: false,
                error: Some(format!("transport error: {e}")),
            },
        }
    }

    fn cache_result(&self, key: &str, info: &RepositoryInfo) {
        let Ok(json) = serde_json::to_string(info) else {
            return;
        };
        if let Err(e) = self.cache.store(key, "npm_guess", BTreeMap::new(), json, String::new(), 1) {
            tracing::warn!(error = %e, key, "failed to cache repository guess");
        }
    }

    /// Guess every URL in `urls`, processing distinct URLs concurrently
    /// with a fixed-size worker pool. The result is aligned 1:1 with input
    /// positions; duplicate URLs yield value-equal results. Checked against
    /// `cancelled` before each distinct URL starts; URLs not yet started
    /// when cancellation is observed are reported with `npm.error =
    /// "cancelled"`.
    pub fn guess_batch(&self, urls: &[String], cancelled: &AtomicBool) -> Vec<GuessResult> {
        let mut distinct: Vec<String> = Vec::new();
        for u in urls {
            if !distinct.contains(u) {
                distinct.push(u.clone());
            }
        }

        let results: Arc<Mutex<HashMap<String, GuessResult>>> = Arc::new(Mutex::new(HashMap::new()));

        for chunk in distinct.chunks(self.pool_size.max(1)) {
            std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for url in chunk {
                    if cancelled.load(Ordering::SeqCst) {
                        let mut guard = results.lock().expect("guesser results lock poisoned");
                        guard.insert(url.clone(), cancelled_result());
                        continue;
                    }
                    let results = Arc::clone(&results);
                    let url = url.clone();
                    handles.push(scope.spawn(move || {
                        let outcome = self.guess(&url);
                        results
                            .lock()
                            .expect("guesser results lock poisoned")
                            .insert(url, outcome);
                    }));
                }
                for h in handles {
                    let _ = h.join();
                }
            });
        }

        let guard = results.lock().expect("guesser results lock poisoned");
        urls.iter()
            .map(|u| guard.get(u).cloned().unwrap_or_default())
            .collect()
    }
}

fn cancelled_result() -> GuessResult {
    GuessResult {
        npm: Some(RepositoryInfo {
            kind: "npm".to_string(),
            package_name: String::new(),
            version: None,
            description: None,
            install_cmd: None,
            url: None,
            exists: false,
            error: Some("cancelled".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn guesser() -> Guesser {
        let dir = tempdir().unwrap();
        Guesser::new(dir.path().join("guess.redb")).unwrap()
    }

    #[test]
    fn non_github_url_yields_empty_result_without_network_call() {
        let g = guesser();
        let result = g.guess("https://example.com/x");
        assert!(result.npm.is_none());
    }

    #[test]
    fn github_url_owner_repo_parses_owner_and_repo() {
        assert_eq!(
            github_url_owner_repo("https://github.com/facebook/react"),
            Some(("facebook".to_string(), "react".to_string()))
        );
        assert_eq!(
            github_url_owner_repo("https://github.com/facebook/react/tree/main"),
            Some(("facebook".to_string(), "react".to_string()))
        );
        assert_eq!(github_url_owner_repo("https://example.com/x"), None);
    }

    #[test]
    fn scoped_package_name_matches_convention() {
        assert_eq!(scoped_package_name("facebook", "react"), "@facebook/react");
    }

    #[test]
    fn batch_guess_aligns_duplicates_and_non_matches() {
        let g = guesser();
        let cancelled = AtomicBool::new(false);
        let urls = vec![
            "https://github.com/facebook/react".to_string(),
            "https://example.com/x".to_string(),
            "".to_string(),
            "https://github.com/facebook/react".to_string(),
        ];
        let results = g.guess_batch(&urls, &cancelled);
        assert_eq!(results.len(), urls.len());
        assert!(results[1].npm.is_none());
        assert!(results[2].npm.is_none());
        assert!(results[0].npm.is_some());
        assert_eq!(
            results[0].npm.as_ref().unwrap().package_name,
            results[3].npm.as_ref().unwrap().package_name
        );
    }

    #[test]
    fn guess_batch_preserves_length_and_duplicate_alignment() {
        let g = guesser();
        let cancelled = AtomicBool::new(true);
        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ];
        let results = g.guess_batch(&urls, &cancelled);
        assert_eq!(results.len(), urls.len());
        // Non-GitHub URLs never touch the cancellation path or network.
        assert!(results.iter().all(|r| r.npm.is_none()));
    }
}
