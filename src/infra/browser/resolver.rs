//! Best-effort discovery of a Chrome/Chromium executable.
//!
//! Lookup is two-phased: well-known install locations for the platform are
//! probed first, then `which`/`where` is asked for each known binary name.
//! Nothing here is fatal; a miss simply yields `None`.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, info};

const SOURCE: &str = "infra::browser::resolver";

const MACOS_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
];

const LINUX_CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/usr/bin/google-chrome-unstable",
];

const WINDOWS_CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Users\%USERNAME%\AppData\Local\Google\Chrome\Application\chrome.exe",
];

const UNIX_BINARY_NAMES: &[&str] = &["google-chrome", "chromium", "google-chrome-stable"];
const WINDOWS_BINARY_NAMES: &[&str] = &["chrome", "google-chrome"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Other => "other",
        }
    }

    fn candidates(self) -> &'static [&'static str] {
        match self {
            Platform::MacOs => MACOS_CANDIDATES,
            Platform::Linux => LINUX_CANDIDATES,
            Platform::Windows => WINDOWS_CANDIDATES,
            Platform::Other => &[],
        }
    }

    fn binary_names(self) -> &'static [&'static str] {
        match self {
            Platform::Windows => WINDOWS_BINARY_NAMES,
            _ => UNIX_BINARY_NAMES,
        }
    }

    fn locator(self) -> &'static str {
        match self {
            Platform::Windows => "where",
            _ => "which",
        }
    }
}

/// Ordered lookup over install locations and `PATH`.
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    platform: Platform,
    candidates: Vec<String>,
    binary_names: Vec<String>,
    locator: PathBuf,
}

impl ExecutableResolver {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            candidates: platform.candidates().iter().map(|s| s.to_string()).collect(),
            binary_names: platform
                .binary_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            locator: PathBuf::from(platform.locator()),
        }
    }

    pub fn for_current_platform() -> Self {
        Self::for_platform(Platform::current())
    }

    /// Replace the install locations probed in the first phase.
    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the binary names and the `which`-style program used in the
    /// second phase.
    pub fn with_path_lookup<I, S>(mut self, locator: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locator = locator.into();
        self.binary_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve using the process environment for placeholder expansion.
    pub fn resolve(&self) -> Option<PathBuf> {
        self.resolve_with(|name| env::var(name).ok())
    }

    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
        for candidate in &self.candidates {
            let expanded = expand_placeholders(candidate, &lookup);
            let path = PathBuf::from(expanded);
            if exists(&path) {
                info!(
                    target = SOURCE,
                    op = "resolver::resolve",
                    platform = self.platform.as_str(),
                    phase = "candidates",
                    path = %path.display(),
                    "Found browser executable"
                );
                return Some(path);
            }
        }

        for name in &self.binary_names {
            if let Some(path) = locate_on_path(&self.locator, name) {
                info!(
                    target = SOURCE,
                    op = "resolver::resolve",
                    platform = self.platform.as_str(),
                    phase = "path_lookup",
                    binary = %name,
                    path = %path.display(),
                    "Found browser executable"
                );
                return Some(path);
            }
        }

        debug!(
            target = SOURCE,
            op = "resolver::resolve",
            platform = self.platform.as_str(),
            "No browser executable found"
        );
        None
    }
}

/// Expand `%NAME%` tokens. Unknown variables expand to an empty string and an
/// unterminated `%` is kept literally.
pub fn expand_placeholders(path: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(start) = rest.find('%') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                output.push_str(&lookup(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                output.push('%');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

/// Permission and I/O errors count as "absent".
fn exists(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

fn locate_on_path(locator: &Path, name: &str) -> Option<PathBuf> {
    let output = Command::new(locator)
        .arg(name)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let path = PathBuf::from(first);
    exists(&path).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"").expect("write candidate");
        path
    }

    fn no_path_lookup(resolver: ExecutableResolver) -> ExecutableResolver {
        resolver.with_path_lookup("/nonexistent/which", Vec::<String>::new())
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = TempDir::new().expect("temp dir");
        let second = touch(&dir, "chromium");
        let third = touch(&dir, "chrome");

        let resolver = no_path_lookup(ExecutableResolver::for_platform(Platform::Linux))
            .with_candidates([
                dir.path().join("missing").display().to_string(),
                second.display().to_string(),
                third.display().to_string(),
            ]);

        assert_eq!(resolver.resolve(), Some(second));
    }

    #[test]
    fn directories_are_not_executables() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = no_path_lookup(ExecutableResolver::for_platform(Platform::Linux))
            .with_candidates([dir.path().display().to_string()]);

        assert_eq!(resolver.resolve(), None);
    }

    #[test]
    fn placeholders_expand_before_probing() {
        let dir = TempDir::new().expect("temp dir");
        let target = touch(&dir, "alice-chrome.exe");
        let template = dir.path().join("%USERNAME%-chrome.exe").display().to_string();

        let env = HashMap::from([("USERNAME".to_string(), "alice".to_string())]);
        let resolver = no_path_lookup(ExecutableResolver::for_platform(Platform::Windows))
            .with_candidates([template]);

        assert_eq!(
            resolver.resolve_with(|name| env.get(name).cloned()),
            Some(target)
        );
    }

    #[test]
    fn expand_handles_missing_and_unterminated_tokens() {
        let lookup = |name: &str| (name == "HOME").then(|| "/home/me".to_string());
        assert_eq!(expand_placeholders("%HOME%/bin", lookup), "/home/me/bin");
        assert_eq!(expand_placeholders("C:\\%NOPE%\\x", lookup), "C:\\\\x");
        assert_eq!(expand_placeholders("100%", lookup), "100%");
        assert_eq!(expand_placeholders("%%", lookup), "%%");
    }

    #[test]
    fn missing_locator_yields_not_found() {
        let resolver = ExecutableResolver::for_platform(Platform::Linux)
            .with_candidates(Vec::<String>::new())
            .with_path_lookup("/nonexistent/which", ["google-chrome"]);

        assert_eq!(resolver.resolve(), None);
    }

    #[test]
    fn other_platforms_have_no_candidates() {
        assert!(Platform::Other.candidates().is_empty());
        assert_eq!(Platform::Windows.locator(), "where");
    }

    #[cfg(unix)]
    #[test]
    fn path_lookup_accepts_first_existing_result() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let chromium = touch(&dir, "chromium-bin");
        let locator = dir.path().join("fake-which");
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  ghost) echo /nonexistent/ghost ;;\n  chromium) echo \"{}\" ;;\n  *) exit 1 ;;\nesac\n",
            chromium.display()
        );
        fs::write(&locator, script).expect("write locator");
        let mut perms = fs::metadata(&locator).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&locator, perms).expect("set perms");

        let resolver = ExecutableResolver::for_platform(Platform::Linux)
            .with_candidates(Vec::<String>::new())
            .with_path_lookup(&locator, ["absent", "ghost", "chromium"]);

        assert_eq!(resolver.resolve(), Some(chromium));
    }
}
