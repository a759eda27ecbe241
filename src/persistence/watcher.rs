//! Keeps the store in sync with edits made to the profile directory
//!
//! ```text
//! notify (debounced) ──► mpsc ──► watch_profiles ──► ProfileStore
//!     "active"            ─► reload_active
//!     <name>.json exists  ─► reload_one
//!     <name>.json gone    ─► remove_one
//! ```

use super::error::StoreError;
use super::storage::{self, ACTIVE_LINK};
use super::store::ProfileStore;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a changed path means for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChange {
    Active,
    Updated(String),
    Removed(String),
}

/// Classifies a changed path. Anything that is neither the `active` link nor
/// a profile document is ignored.
pub fn classify(path: &Path) -> Option<ProfileChange> {
    if path.file_name().and_then(|f| f.to_str()) == Some(ACTIVE_LINK) {
        return Some(ProfileChange::Active);
    }
    let name = storage::profile_name(path)?;
    if path.exists() {
        Some(ProfileChange::Updated(name))
    } else {
        Some(ProfileChange::Removed(name))
    }
}

pub async fn apply_change(store: &ProfileStore, change: ProfileChange) {
    match change {
        ProfileChange::Active => {
            if let Err(e) = store.reload_active().await {
                warn!("Failed to follow active profile: {}", e);
            }
        }
        ProfileChange::Updated(name) => {
            if let Err(e) = store.reload_one(&name).await {
                warn!("Failed to reload profile {}: {}", name, e);
            }
        }
        ProfileChange::Removed(name) => store.remove_one(&name),
    }
}

/// Watches the profile directory until `cancel` fires.
pub async fn watch_profiles(
    store: Arc<ProfileStore>,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    let dir = store.paths().profiles_dir.clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            let paths = events.into_iter().map(|event| event.path).collect();
            // receiver gone means the loop below has stopped
            let _ = tx.send(paths);
        }
        Err(e) => error!("Profile watcher error: {:?}", e),
    })?;
    debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive)?;
    info!("Watching {}", dir.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Profile watcher shutting down");
                break;
            }
            batch = rx.recv() => {
                let Some(paths) = batch else {
                    warn!("Profile watcher channel closed");
                    break;
                };
                // one reload per path per batch
                let unique: BTreeSet<PathBuf> = paths.into_iter().collect();
                for path in unique {
                    if let Some(change) = classify(&path) {
                        debug!("{} changed: {:?}", path.display(), change);
                        apply_change(&store, change).await;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::EventHub;
    use crate::mapping::{OutputBinding, RawEvent};
    use crate::persistence::DevicePaths;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("a.json");
        std::fs::write(&existing, "{}").unwrap();

        assert_eq!(classify(&dir.path().join("active")), Some(ProfileChange::Active));
        assert_eq!(classify(&existing), Some(ProfileChange::Updated("a".into())));
        assert_eq!(
            classify(&dir.path().join("gone.json")),
            Some(ProfileChange::Removed("gone".into()))
        );
        assert_eq!(classify(&dir.path().join(".a.json.1.0.tmp")), None);
        assert_eq!(classify(&dir.path().join("notes.txt")), None);
    }

    #[tokio::test]
    async fn test_watcher_picks_up_external_edits() {
        let dir = TempDir::new().unwrap();
        let paths = DevicePaths::new(dir.path(), "W");
        paths.ensure_dirs().await.unwrap();
        let store = Arc::new(ProfileStore::new(paths, 3903, EventHub::default()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(watch_profiles(
            store.clone(),
            Duration::from_millis(20),
            cancel.clone(),
        ));
        // let the watcher register before writing
        tokio::time::sleep(Duration::from_millis(200)).await;

        let path = store.paths().profiles_dir.join("ext.json");
        std::fs::write(&path, r#"{"buttons": {"5": [{"code": 30, "mode": 0}]}}"#).unwrap();

        let mut loaded = false;
        for _ in 0..100 {
            if store.document("ext").is_some() {
                loaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(loaded, "profile was not picked up");

        store.activate("ext").await.unwrap();
        let mut resolver = store.resolver();
        assert_eq!(
            resolver.resolve(RawEvent::button(5, 1)).pressed,
            vec![OutputBinding::keyboard(30)]
        );

        std::fs::remove_file(&path).unwrap();
        let mut removed = false;
        for _ in 0..100 {
            if store.document("ext").is_none() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed, "removal was not picked up");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
