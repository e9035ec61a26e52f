//! Environment-variable/home-directory expansion and platform-aware
//! sensitive-path extraction.

use std::sync::LazyLock;

use regex::Regex;
use warden_types::Severity;

/// Indicator substrings (checked against the lower-cased path) that flag a
/// relative path as sensitive regardless of its extension.
const SENSITIVE_INDICATORS: &[&str] = &[
    ".ssh",
    ".aws",
    ".azure",
    ".kube",
    ".config/gcloud",
    ".docker",
    ".npmrc",
    ".pypirc",
    ".netrc",
    ".git-credentials",
    ".env",
    "secrets",
    "credentials",
    "config.json",
];

/// File extensions (and bare-name `.env`) that flag a path as sensitive
/// regardless of directory.
const SENSITIVE_EXTENSIONS: &[&str] = &[
    ".pem", ".key", ".ppk", ".p12", ".pfx", ".jks", ".keystore", ".env",
];

static POSIX_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s'\x22])(/(?:[\w.\-]+/)*[\w.\-]+)").unwrap());

static HOME_RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s'\x22])(~(?:/[\w.\-]+)+)").unwrap());

static WINDOWS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s'\x22])([A-Za-z]:\\(?:[\w.\- ]+\\)*[\w.\- ]+|%[A-Za-z_][A-Za-z0-9_]*%(?:\\[\w.\- ]+)+)").unwrap()
});

static SENSITIVE_RELATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s'\x22])((?:\.[\w.\-]+|[\w.\-]+)(?:/[\w.\-]+)*)").unwrap());

/// Supported OS targets for [`FilePathPattern::platform`] gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    All,
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Darwin
        } else {
            Platform::Linux
        }
    }

    pub fn matches(&self, other: Platform) -> bool {
        matches!(self, Platform::All) || *self == other
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Platform::All),
            "linux" => Ok(Platform::Linux),
            "darwin" => Ok(Platform::Darwin),
            "windows" => Ok(Platform::Windows),
            other => Err(format!("unknown platform scope: {other}")),
        }
    }
}

/// A declarative sensitive-file-path pattern.
#[derive(Debug, Clone)]
pub struct FilePathPattern {
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub globs: Vec<String>,
    pub platform: Platform,
}

impl FilePathPattern {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        globs: Vec<String>,
        platform: Platform,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            severity,
            globs,
            platform,
        }
    }

    /// `true` if this pattern applies on `current`, and any extracted path
    /// equals a glob template, matches it as a glob, or contains the
    /// template's leading-`*`-trimmed suffix as a substring.
    pub fn matches_any(&self, paths: &[String], current: Platform) -> bool {
        if !self.platform.matches(current) {
            return false;
        }
        paths.iter().any(|p| {
            self.globs.iter().any(|g| {
                p == g
                    || glob_match(g, p)
                    || p.contains(g.trim_start_matches('*'))
            })
        })
    }
}

/// Minimal glob matcher supporting `*` (any run) and `?` (one char).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[char], t: &[char]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some('*'), _) => helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..])),
            (Some('?'), Some(_)) => helper(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => helper(&p[1..], &t[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    helper(&p, &t)
}

/// Expand `~`, `$VAR`/`${VAR}`, and `%VAR%` in that order, then normalize:
/// separators become the host style and the result is lexically
/// canonicalized (a `filepath.Clean`-equivalent collapse of `.`, `..`, and
/// repeated separators — no filesystem access). `%VAR%` is expanded on
/// every host (not just Windows) for portability; unknown Windows-style
/// variables are left as-is.
pub fn expand_path(input: &str) -> String {
    let mut s = input.to_string();

    if s == "~" || s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy().to_string();
            s = if s == "~" {
                home
            } else {
                format!("{home}{}", &s[1..])
            };
        }
    }

    s = expand_posix_vars(&s);
    s = expand_percent_vars(&s);
    normalize_path_for(&s, Platform::current())
}

/// Normalize `path` for `platform`: unify separators to the platform's own,
/// lexically clean `.`/`..`/repeated separators (no filesystem access), and
/// on Windows lower-case the result.
pub fn normalize_path_for(path: &str, platform: Platform) -> String {
    let sep = if platform == Platform::Windows { '\\' } else { '/' };
    let other = if sep == '\\' { '/' } else { '\\' };

    let unified: String = path.chars().map(|c| if c == other { sep } else { c }).collect();

    let (drive, body) = if platform == Platform::Windows
        && unified.len() >= 2
        && unified.as_bytes()[0].is_ascii_alphabetic()
        && unified.as_bytes()[1] == b':'
    {
        (unified[..2].to_string(), unified[2..].to_string())
    } else {
        (String::new(), unified)
    };

    let absolute = body.starts_with(sep);
    let mut stack: Vec<&str> = Vec::new();
    for part in body.split(sep) {
        match part {
            "" | "." => continue,
            ".." => {
                if matches!(stack.last(), Some(&last) if last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            part => stack.push(part),
        }
    }

    let sep_str = sep.to_string();
    let mut cleaned = stack.join(&sep_str);
    if absolute {
        cleaned = format!("{sep}{cleaned}");
    } else if cleaned.is_empty() {
        cleaned = ".".to_string();
    }

    let result = format!("{drive}{cleaned}");
    if platform == Platform::Windows {
        result.to_lowercase()
    } else {
        result
    }
}

fn expand_posix_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '{' {
                if let Some(end) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    if let Ok(val) = std::env::var(&name) {
                        out.push_str(&val);
                    } else {
                        out.push_str(&format!("${{{name}}}"));
                    }
                    i += 2 + end + 1;
                    continue;
                }
            } else if chars[i + 1].is_alphabetic() || chars[i + 1] == '_' {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                if let Ok(val) = std::env::var(&name) {
                    out.push_str(&val);
                } else {
                    out.push('$');
                    out.push_str(&name);
                }
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn expand_percent_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(end) = after.find('%') {
            let name = &after[..end];
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                if let Ok(val) = std::env::var(name) {
                    out.push_str(&val);
                } else {
                    out.push('%');
                    out.push_str(name);
                    out.push('%');
                }
            } else {
                out.push('%');
                out.push_str(name);
                out.push('%');
            }
            rest = &after[end + 1..];
        } else {
            out.push('%');
            rest = after;
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Harvest every plausible file-system path reference in `content` using
/// four orthogonal regexes, deduplicated in insertion order.
pub fn extract_paths(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut push = |s: &str| {
        let s = s.to_string();
        if seen.insert(s.clone()) {
            out.push(s);
        }
    };

    for m in POSIX_ABSOLUTE.captures_iter(content) {
        push(&m[1]);
    }
    for m in HOME_RELATIVE.captures_iter(content) {
        push(&m[1]);
    }
    for m in WINDOWS_PATH.captures_iter(content) {
        push(&m[1]);
    }
    for m in SENSITIVE_RELATIVE.captures_iter(content) {
        let candidate = &m[1];
        let lower = candidate.to_lowercase();
        if SENSITIVE_INDICATORS.iter().any(|i| lower.contains(i))
            || SENSITIVE_EXTENSIONS.iter().any(|e| lower.ends_with(e))
        {
            push(candidate);
        }
    }
    out
}
