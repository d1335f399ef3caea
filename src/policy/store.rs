//! Policy store — owns the rule-set snapshot the engine evaluates against.
//!
//! Evaluators get an immutable `Arc` snapshot via [`PolicyStore::current_rules`];
//! reload builds a whole new compiled snapshot and swaps it in atomically, so
//! no evaluation ever observes a torn update. A failed reload keeps the
//! previous snapshot (fail closed: broken configuration never widens access).

use crate::policy::engine::CompiledRuleSet;
use crate::policy::parser::parse_ruleset_file;
use crate::policy::types::RuleSet;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

pub struct PolicyStore {
    /// Backing file, if any. In-memory stores (tests, templates) can't reload.
    path: Option<PathBuf>,
    current: RwLock<Arc<CompiledRuleSet>>,
    version: AtomicU64,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl PolicyStore {
    /// Load and compile the rule set from a YAML file.
    /// An unreadable or invalid file at startup is fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ruleset = parse_ruleset_file(&path)?;
        let compiled = CompiledRuleSet::new(ruleset)?;
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(compiled)),
            version: AtomicU64::new(1),
            last_mtime: Mutex::new(mtime),
        })
    }

    /// Build a store from an already-parsed rule set (no backing file).
    pub fn from_ruleset(ruleset: RuleSet) -> Result<Self> {
        let compiled = CompiledRuleSet::new(ruleset)?;
        Ok(Self {
            path: None,
            current: RwLock::new(Arc::new(compiled)),
            version: AtomicU64::new(1),
            last_mtime: Mutex::new(None),
        })
    }

    /// The current immutable snapshot. Cheap: clones an `Arc` under a
    /// read lock that is never held across I/O.
    pub fn current_rules(&self) -> Arc<CompiledRuleSet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Snapshot version, bumped on every successful reload.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Re-read the backing file and swap in a new snapshot.
    /// On error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<u64> {
        let Some(ref path) = self.path else {
            bail!("Policy store has no backing file to reload from");
        };

        let ruleset =
            parse_ruleset_file(path).context("Policy reload failed; keeping previous rules")?;
        let compiled = CompiledRuleSet::new(ruleset)
            .context("Policy reload failed to compile; keeping previous rules")?;

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(compiled);
        drop(guard);

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(version, "Policy reloaded from {}", path.display());
        Ok(version)
    }

    /// Spawn a background task that polls the backing file's mtime and
    /// reloads when it changes. Reload errors are logged, never fatal.
    pub fn spawn_reload_task(self: &Arc<Self>, poll_interval: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = store.reload_if_changed() {
                    tracing::warn!("Policy hot-reload failed: {:#}", e);
                }
            }
        });
    }

    fn reload_if_changed(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat policy file: {}", path.display()))?;

        let mut last = self
            .last_mtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == Some(mtime) {
            return Ok(());
        }
        *last = Some(mtime);
        drop(last);

        self.reload().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::{Action, ActionContext, DefaultVerdict};
    use std::io::Write;
    use tempfile::TempDir;

    const INITIAL: &str = r#"
policy: v1
rules:
  - allow: write
    if_path_matches: ["src/**"]
"#;

    const UPDATED: &str = r#"
policy: v2
rules:
  - deny: write
    if_path_matches: ["src/**"]
"#;

    fn write_policy(path: &std::path::Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_and_snapshot() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.yaml");
        write_policy(&path, INITIAL);

        let store = PolicyStore::load(&path).unwrap();
        assert_eq!(store.version(), 1);

        let snapshot = store.current_rules();
        assert_eq!(snapshot.name(), "v1");
        let intent = snapshot.evaluate(
            &Action::Write,
            &ActionContext::new("src/main.rs"),
            DefaultVerdict::Deny,
        );
        assert!(intent.is_allow());
    }

    #[test]
    fn test_reload_swaps_snapshot_atomically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.yaml");
        write_policy(&path, INITIAL);

        let store = PolicyStore::load(&path).unwrap();
        // An evaluator holding the old snapshot keeps seeing it
        let old_snapshot = store.current_rules();

        write_policy(&path, UPDATED);
        let version = store.reload().unwrap();
        assert_eq!(version, 2);

        assert_eq!(old_snapshot.name(), "v1");
        assert_eq!(store.current_rules().name(), "v2");

        let intent = store.current_rules().evaluate(
            &Action::Write,
            &ActionContext::new("src/main.rs"),
            DefaultVerdict::Deny,
        );
        assert!(intent.is_deny());
    }

    #[test]
    fn test_failed_reload_keeps_previous_rules() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.yaml");
        write_policy(&path, INITIAL);

        let store = PolicyStore::load(&path).unwrap();
        write_policy(&path, "not: [valid, policy");

        assert!(store.reload().is_err());
        assert_eq!(store.version(), 1);
        assert_eq!(store.current_rules().name(), "v1");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.yaml");
        write_policy(&path, "policy: ''\nrules: []");
        assert!(PolicyStore::load(&path).is_err());
    }

    #[test]
    fn test_in_memory_store_cannot_reload() {
        let ruleset = crate::policy::parser::parse_ruleset_str(INITIAL).unwrap();
        let store = PolicyStore::from_ruleset(ruleset).unwrap();
        assert!(store.reload().is_err());
    }
}
