use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{BrowseError, Result};
use crate::session::Action;

/// A named sequence of session actions, stored as JSON and replayed by
/// [`Session::run_script`](crate::Session::run_script).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    /// Page loaded before the first action. Empty means "start from the current page".
    #[serde(default)]
    pub start_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub actions: Vec<Action>,
}

impl Script {
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Host of the start URL, if it has one.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.start_url)
            .ok()?
            .host_str()
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptSummary {
    pub name: String,
    pub host: Option<String>,
    pub description: Option<String>,
    pub action_count: usize,
}

impl From<&Script> for ScriptSummary {
    fn from(s: &Script) -> Self {
        Self {
            name: s.name.clone(),
            host: s.host(),
            description: s.description.clone(),
            action_count: s.actions.len(),
        }
    }
}

/// File stem for a script name: lowercase, runs of anything else folded to one `-`.
fn slug(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    (!out.is_empty()).then_some(out)
}

/// Base directory for saved scripts: `~/.formwalk/scripts`
pub fn scripts_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".formwalk")
        .join("scripts")
}

// ── ScriptStore ─────────────────────────────────────────────────────────────

/// Saved scripts, one `<slug>.json` per script in a flat directory.
pub struct ScriptStore {
    base: PathBuf,
}

impl Default for ScriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptStore {
    pub fn new() -> Self {
        Self {
            base: scripts_dir(),
        }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let stem = slug(name).ok_or_else(|| BrowseError::not_found("script", name))?;
        Ok(self.base.join(format!("{stem}.json")))
    }

    /// Write a script, replacing any saved under the same name. Returns the path written.
    pub fn save(&self, script: &Script) -> Result<PathBuf> {
        let path = self.path_for(&script.name)?;
        fs::create_dir_all(&self.base)?;
        fs::write(&path, serde_json::to_string_pretty(script)?)?;
        debug!(name = %script.name, path = %path.display(), "saved script");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Script> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(BrowseError::not_found("script", name));
        }
        Script::from_file(&path)
    }

    /// Summaries sorted by name, optionally only those whose start URL is on `host`.
    /// Files that fail to parse are skipped.
    pub fn list(&self, host: Option<&str>) -> Result<Vec<ScriptSummary>> {
        if !self.base.exists() {
            return Ok(vec![]);
        }
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.base)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Script::from_file(&path) {
                Ok(script) => summaries.push(ScriptSummary::from(&script)),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable script"),
            }
        }
        if let Some(host) = host {
            summaries.retain(|s| s.host.as_deref() == Some(host));
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BrowseError::not_found("script", name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(name: &str, start_url: &str) -> Script {
        Script {
            name: name.into(),
            start_url: start_url.into(),
            description: None,
            actions: vec![Action::Click {
                href: "next".into(),
            }],
        }
    }

    #[test]
    fn slugs() {
        assert_eq!(slug("album-search").as_deref(), Some("album-search"));
        assert_eq!(slug("Find by Year!").as_deref(), Some("find-by-year"));
        assert_eq!(slug("  a -- b  ").as_deref(), Some("a-b"));
        assert_eq!(slug("---"), None);
        assert_eq!(slug(""), None);
    }

    #[test]
    fn host_comes_from_start_url() {
        assert_eq!(
            script("s", "http://music.example.com:8080/x").host().as_deref(),
            Some("music.example.com")
        );
        assert_eq!(script("s", "").host(), None);
    }

    #[test]
    fn names_differing_only_in_punctuation_share_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScriptStore::with_base(tmp.path().to_path_buf());
        store.save(&script("Album Search", "http://a.com/")).unwrap();
        store.save(&script("album-search", "http://b.com/")).unwrap();

        let listed = store.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].host.as_deref(), Some("b.com"));
    }

    #[test]
    fn list_filters_by_host_and_skips_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScriptStore::with_base(tmp.path().to_path_buf());
        store.save(&script("b", "http://music.example.com/")).unwrap();
        store.save(&script("a", "http://music.example.com/x")).unwrap();
        store.save(&script("c", "http://other.net/")).unwrap();
        fs::write(tmp.path().join("broken.json"), "{").unwrap();

        let names: Vec<String> = store
            .list(Some("music.example.com"))
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.list(None).unwrap().len(), 3);
    }

    #[test]
    fn missing_and_unnamed_scripts_are_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ScriptStore::with_base(tmp.path().join("never-created"));
        assert!(store.list(None).unwrap().is_empty());
        assert!(matches!(
            store.load("nope"),
            Err(BrowseError::ElementNotFound { what: "script", .. })
        ));
        assert!(matches!(
            store.delete("nope"),
            Err(BrowseError::ElementNotFound { what: "script", .. })
        ));
        assert!(store.save(&script("!!", "")).is_err());
    }
}
