use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::backend::TaskTable;
use crate::backend::memory::InMemoryTable;
use crate::backend::postgres::PostgresTable;
use crate::session::Identity;

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config {
            map: HashMap::new(),
            loaded_files: vec![],
        };

        cfg.map
            .insert("backend".to_string(), "memory".to_string());
        cfg.map.insert("color".to_string(), "on".to_string());

        let rc_path = resolve_rc_path(rc_override)?;
        if let Some(path) = rc_path {
            info!(rc = %path.display(), "loading taskdeckrc");
            cfg.load_file(&path)?;
        } else {
            debug!("no taskdeckrc found; using defaults");
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            debug!(key = %k, value = %v, "applying override");
            self.map.insert(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(path.clone());

        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }
            if line.is_empty() {
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

// Wires the configured remote table capability. `memory` is a
// process-local table for demos and tests; `postgres` talks to the
// hosted backend named by backend.url.
#[tracing::instrument(skip(cfg))]
pub fn resolve_table(cfg: &Config) -> anyhow::Result<Arc<dyn TaskTable>> {
    let backend = cfg.get("backend").unwrap_or_else(|| "memory".to_string());
    match backend.as_str() {
        "memory" => {
            info!("using in-memory backend");
            Ok(Arc::new(InMemoryTable::new()))
        }
        "postgres" => {
            let url = cfg
                .get("backend.url")
                .ok_or_else(|| anyhow!("backend.url is required for the postgres backend"))?;
            info!("using postgres backend");
            Ok(Arc::new(PostgresTable::connect(&url)?))
        }
        other => Err(anyhow!("unknown backend: {other}")),
    }
}

// The identity service proper lives outside this client; the CLI resolves
// the already-authenticated identity from configuration. With the memory
// backend an unset user.id falls back to a stable local identity.
#[tracing::instrument(skip(cfg))]
pub fn resolve_identity(cfg: &Config) -> anyhow::Result<Option<Identity>> {
    let email = cfg
        .get("user.email")
        .unwrap_or_else(|| "local@taskdeck".to_string());

    if let Some(raw) = cfg.get("user.id") {
        let id: Uuid = raw
            .parse()
            .with_context(|| format!("user.id is not a valid uuid: {raw}"))?;
        return Ok(Some(Identity::new(id, email)));
    }

    let backend = cfg.get("backend").unwrap_or_else(|| "memory".to_string());
    if backend == "memory" {
        debug!("no user.id configured; using local identity");
        return Ok(Some(Identity::new(Uuid::nil(), email)));
    }

    warn!("no user.id configured; commands will require sign-in");
    Ok(None)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var("TASKDECKRC") {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(".taskdeckrc");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_select_memory_backend_and_color() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# empty rc").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.get("backend").as_deref(), Some("memory"));
        assert_eq!(cfg.get_bool("color"), Some(true));
    }

    #[test]
    fn missing_explicit_rc_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/no/such/taskdeckrc"))).is_err());
    }

    #[test]
    fn rc_file_keys_and_comments_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# taskdeck rc").unwrap();
        writeln!(file, "backend = postgres").unwrap();
        writeln!(file, "backend.url = postgres://localhost/deck # local").unwrap();
        writeln!(file, "user.email = ada@example.com").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();

        assert_eq!(cfg.get("backend").as_deref(), Some("postgres"));
        assert_eq!(
            cfg.get("backend.url").as_deref(),
            Some("postgres://localhost/deck")
        );
        assert_eq!(cfg.get("user.email").as_deref(), Some("ada@example.com"));
        assert_eq!(cfg.loaded_files.len(), 1);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "color = off").unwrap();
        let mut cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.get_bool("color"), Some(false));

        cfg.apply_overrides(vec![("color".to_string(), "on".to_string())]);
        assert_eq!(cfg.get_bool("color"), Some(true));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend postgres").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn identity_resolution_rules() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user.id = not-a-uuid").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();
        assert!(resolve_identity(&cfg).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let id = Uuid::new_v4();
        writeln!(file, "user.id = {id}").unwrap();
        writeln!(file, "user.email = ada@example.com").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();
        let identity = resolve_identity(&cfg).unwrap().unwrap();
        assert_eq!(identity.id, id);
        assert_eq!(identity.email, "ada@example.com");

        // Memory backend without user.id: stable local identity.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = memory").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();
        let identity = resolve_identity(&cfg).unwrap().unwrap();
        assert_eq!(identity.id, Uuid::nil());

        // Postgres backend without user.id: signed out.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = postgres").unwrap();
        let cfg = Config::load(Some(file.path())).unwrap();
        assert!(resolve_identity(&cfg).unwrap().is_none());
    }
}
