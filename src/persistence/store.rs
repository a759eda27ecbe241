//! Concurrent registry of a device's profiles
//!
//! Every piece of shared state is an immutable value behind an `Arc`, published
//! through a `tokio::sync::watch` channel. A mutation builds the next value
//! from a copy of the previous one, outside the channel, and swaps it in with
//! `send_replace`; readers clone the `Arc` and always see one complete
//! snapshot. Compiled mappings, documents and window rules share one
//! [`ProfileSnapshot`], so they always describe the same set of profiles.
//!
//! ```text
//!                   ┌────────────── ProfileStore ──────────────┐
//!  watcher ───────► │ profiles: ProfileSnapshot                │
//!  editor/UI ─────► │   compiled:  name -> CompiledMapping     │ ──► Resolver (event path)
//!  auto-switch ───► │   documents: name -> ProfileDocument     │
//!                   │   rules:     [WindowRule]                │
//!                   │ active:    (name, CompiledMapping)       │
//!                   │ metadata                                 │
//!                   └──────────────────────────────────────────┘
//! ```

use super::error::StoreError;
use super::storage::{self, profile_file_name, profile_path};
use super::templates::template_for;
use super::{DevicePaths, Metadata};
use crate::broadcast::EventHub;
use crate::mapping::{
    parse_document, BindingSlot, CompiledMapping, OutputBinding, ProfileDocument, RawEvent,
    Resolution, ResolutionState, WindowMatch,
};
use regex::Regex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DEFAULT_PROFILE: &str = "default";

pub type CompiledMap = Arc<HashMap<String, Arc<CompiledMapping>>>;
pub type DocumentMap = Arc<HashMap<String, Arc<ProfileDocument>>>;
pub type WindowRules = Arc<Vec<WindowRule>>;

/// One generation of every loaded profile
#[derive(Debug, Clone, Default)]
pub struct ProfileSnapshot {
    pub compiled: CompiledMap,
    pub documents: DocumentMap,
    pub window_rules: WindowRules,
}

impl ProfileSnapshot {
    pub fn contains(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    /// Copy with `name` replaced by `document`
    fn with_profile(
        &self,
        name: &str,
        document: Arc<ProfileDocument>,
        mapping: Arc<CompiledMapping>,
    ) -> Self {
        let mut compiled = HashMap::clone(&self.compiled);
        compiled.insert(name.to_string(), mapping);
        let mut documents = HashMap::clone(&self.documents);
        documents.insert(name.to_string(), document.clone());
        let mut window_rules: Vec<WindowRule> = self
            .window_rules
            .iter()
            .filter(|r| r.profile != name)
            .cloned()
            .collect();
        window_rules.extend(WindowRule::compile(name, &document.window_match));
        Self {
            compiled: Arc::new(compiled),
            documents: Arc::new(documents),
            window_rules: Arc::new(window_rules),
        }
    }

    /// Copy without `name`
    fn without_profile(&self, name: &str) -> Self {
        let mut compiled = HashMap::clone(&self.compiled);
        compiled.remove(name);
        let mut documents = HashMap::clone(&self.documents);
        documents.remove(name);
        let window_rules = self
            .window_rules
            .iter()
            .filter(|r| r.profile != name)
            .cloned()
            .collect();
        Self {
            compiled: Arc::new(compiled),
            documents: Arc::new(documents),
            window_rules: Arc::new(window_rules),
        }
    }
}

/// Compiled window patterns of one profile
#[derive(Debug, Clone)]
pub struct WindowRule {
    pub profile: String,
    pub name: Option<Regex>,
    pub class: Option<Regex>,
}

impl WindowRule {
    /// `None` when the profile has no usable pattern. Invalid patterns are
    /// logged and ignored.
    pub fn compile(profile: &str, window_match: &WindowMatch) -> Option<Self> {
        let compile = |kind: &str, pattern: &Option<String>| {
            let pattern = pattern.as_deref()?;
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Invalid {} pattern for profile {}: {}", kind, profile, e);
                    None
                }
            }
        };

        let name = compile("name", &window_match.name_pattern);
        let class = compile("class", &window_match.class_pattern);
        if name.is_none() && class.is_none() {
            return None;
        }
        Some(Self {
            profile: profile.to_string(),
            name,
            class,
        })
    }

    /// Either pattern matching is enough.
    pub fn matches(&self, window_name: &str, window_class: &str) -> bool {
        self.name.as_ref().is_some_and(|r| r.is_match(window_name))
            || self.class.as_ref().is_some_and(|r| r.is_match(window_class))
    }
}

/// The active profile's name together with its compiled mapping
#[derive(Debug, Clone, Default)]
pub struct ActiveProfile {
    pub name: Option<String>,
    /// `None` while the named profile is not loaded
    pub mapping: Option<Arc<CompiledMapping>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: String,
    pub active: bool,
}

pub struct ProfileStore {
    paths: DevicePaths,
    product_id: u16,
    profiles: watch::Sender<Arc<ProfileSnapshot>>,
    active: watch::Sender<ActiveProfile>,
    metadata: watch::Sender<Arc<Metadata>>,
    hub: EventHub,
    // serializes read-modify-publish sequences; never held across an await
    writes: Mutex<()>,
    // serializes activation so disk and memory agree on the order
    activation: tokio::sync::Mutex<()>,
    // held from publishing an edit until its file is written, and while a
    // profile file is read back, so disk never trails memory
    disk: tokio::sync::Mutex<()>,
}

impl ProfileStore {
    pub fn new(paths: DevicePaths, product_id: u16, hub: EventHub) -> Self {
        info!(
            "Creating profile store in {} for product id {}",
            paths.profiles_dir.display(),
            product_id
        );
        Self {
            paths,
            product_id,
            profiles: watch::channel(Arc::new(ProfileSnapshot::default())).0,
            active: watch::channel(ActiveProfile::default()).0,
            metadata: watch::channel(Arc::new(Metadata::default())).0,
            hub,
            writes: Mutex::new(()),
            activation: tokio::sync::Mutex::new(()),
            disk: tokio::sync::Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &DevicePaths {
        &self.paths
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        profile_path(&self.paths.profiles_dir, name)
    }

    // ---- reads -----------------------------------------------------------

    /// Compiled mappings, documents and rules of the same generation
    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        self.profiles.borrow().clone()
    }

    pub fn compiled(&self) -> CompiledMap {
        self.profiles.borrow().compiled.clone()
    }

    pub fn documents(&self) -> DocumentMap {
        self.profiles.borrow().documents.clone()
    }

    pub fn document(&self, name: &str) -> Option<Arc<ProfileDocument>> {
        self.profiles.borrow().documents.get(name).cloned()
    }

    pub fn window_rules(&self) -> WindowRules {
        self.profiles.borrow().window_rules.clone()
    }

    pub fn active(&self) -> ActiveProfile {
        self.active.borrow().clone()
    }

    pub fn active_name(&self) -> Option<String> {
        self.active.borrow().name.clone()
    }

    pub fn metadata(&self) -> Arc<Metadata> {
        self.metadata.borrow().clone()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<ActiveProfile> {
        self.active.subscribe()
    }

    pub fn subscribe_metadata(&self) -> watch::Receiver<Arc<Metadata>> {
        self.metadata.subscribe()
    }

    /// All loaded profiles, sorted case-insensitively
    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        let active = self.active_name();
        let mut profiles: Vec<ProfileSummary> = self
            .documents()
            .keys()
            .map(|name| ProfileSummary {
                active: active.as_deref() == Some(name.as_str()),
                name: name.clone(),
            })
            .collect();
        profiles.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        profiles
    }

    /// Bindings at one position of a loaded profile, for editors
    pub fn bindings(
        &self,
        name: &str,
        slot: BindingSlot,
        index: u8,
    ) -> Result<Vec<OutputBinding>, StoreError> {
        let document = self
            .document(name)
            .ok_or_else(|| StoreError::ProfileNotFound(name.to_string()))?;
        Ok(document.bindings_at(slot, index).to_vec())
    }

    /// Profile of the first window rule matching the given window
    pub fn match_window(&self, window_name: &str, window_class: &str) -> Option<String> {
        self.window_rules()
            .iter()
            .find(|rule| rule.matches(window_name, window_class))
            .map(|rule| rule.profile.clone())
    }

    /// A resolver bound to this store's active profile. The daemon creates
    /// exactly one, owned by the event loop.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.active.subscribe())
    }

    // ---- loading ---------------------------------------------------------

    /// Reads and parses one document. Legacy documents are migrated in memory
    /// and written back in the background.
    async fn read_document(&self, name: &str) -> Result<ProfileDocument, StoreError> {
        let path = self.profile_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::ProfileNotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let parsed = parse_document(&bytes).map_err(|source| StoreError::Parse {
            name: name.to_string(),
            source,
        })?;

        if parsed.migrated {
            info!("Migrated profile {} from the legacy schema", name);
            match parsed.document.to_json() {
                Ok(bytes) => {
                    tokio::spawn(async move {
                        if let Err(e) = storage::write_atomic(&path, &bytes).await {
                            warn!("Failed to write back migrated {}: {}", path.display(), e);
                        }
                    });
                }
                Err(e) => warn!("Failed to serialize migrated profile {}: {}", name, e),
            }
        }

        Ok(parsed.document)
    }

    /// Scans the profile directory and replaces all profile snapshots at once.
    /// Profiles that fail to load are skipped.
    pub async fn load_all(&self) -> Result<usize, StoreError> {
        let _disk = self.disk.lock().await;
        let dir = &self.paths.profiles_dir;
        let names = storage::list_profile_names(dir)
            .await
            .map_err(|e| StoreError::io(dir, e))?;

        let mut compiled = HashMap::new();
        let mut documents = HashMap::new();
        let mut rules = Vec::new();

        for name in names {
            let document = match self.read_document(&name).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("Skipping profile {}: {}", name, e);
                    continue;
                }
            };
            compiled.insert(name.clone(), Arc::new(CompiledMapping::compile(&document)));
            if let Some(rule) = WindowRule::compile(&name, &document.window_match) {
                rules.push(rule);
            }
            documents.insert(name, Arc::new(document));
        }

        let count = documents.len();
        let snapshot = ProfileSnapshot {
            compiled: Arc::new(compiled),
            documents: Arc::new(documents),
            window_rules: Arc::new(rules),
        };
        {
            let _guard = self.lock_writes();
            self.profiles.send_replace(Arc::new(snapshot));
            self.refresh_active_mapping();
        }
        info!("Loaded {} profiles", count);
        Ok(count)
    }

    /// Re-reads one document and replaces only its entries.
    pub async fn reload_one(&self, name: &str) -> Result<(), StoreError> {
        let _disk = self.disk.lock().await;
        let document = self.read_document(name).await?;
        self.publish_profile(name, document);
        debug!("Reloaded profile {}", name);
        Ok(())
    }

    /// Drops a profile from every snapshot.
    pub fn remove_one(&self, name: &str) {
        let _guard = self.lock_writes();
        let current = self.snapshot();
        if !current.contains(name) {
            return;
        }
        self.profiles
            .send_replace(Arc::new(current.without_profile(name)));
        self.active.send_if_modified(|active| {
            if active.name.as_deref() == Some(name) && active.mapping.is_some() {
                active.mapping = None;
                return true;
            }
            false
        });
        info!("Removed profile {}", name);
    }

    fn publish_profile(&self, name: &str, document: ProfileDocument) -> Arc<ProfileDocument> {
        let _guard = self.lock_writes();
        self.publish_locked(name, Arc::new(document))
    }

    fn publish_locked(&self, name: &str, document: Arc<ProfileDocument>) -> Arc<ProfileDocument> {
        let mapping = Arc::new(CompiledMapping::compile(&document));
        let next = self
            .snapshot()
            .with_profile(name, document.clone(), mapping.clone());
        self.profiles.send_replace(Arc::new(next));
        self.active.send_if_modified(|active| {
            if active.name.as_deref() == Some(name) {
                active.mapping = Some(mapping);
                return true;
            }
            false
        });
        document
    }

    fn refresh_active_mapping(&self) {
        let compiled = self.compiled();
        self.active.send_modify(|active| {
            active.mapping = active
                .name
                .as_deref()
                .and_then(|name| compiled.get(name).cloned());
        });
    }

    fn set_active(&self, name: &str) {
        let mapping = self.compiled().get(name).cloned();
        if mapping.is_none() {
            warn!("Active profile {} is not loaded", name);
        }
        self.active.send_replace(ActiveProfile {
            name: Some(name.to_string()),
            mapping,
        });
    }

    // ---- activation ------------------------------------------------------

    /// Points `active` at `name` on disk, then in memory, then notifies
    /// subscribers.
    pub async fn activate(&self, name: &str) -> Result<(), StoreError> {
        let _activation = self.activation.lock().await;

        let path = self.profile_path(name);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        if !exists {
            return Err(StoreError::ProfileNotFound(name.to_string()));
        }

        // parse an unloaded target before the pointer moves to it
        let unloaded = if self.snapshot().contains(name) {
            None
        } else {
            Some(self.read_document(name).await?)
        };

        let link = self.paths.active_link();
        storage::swap_link(&link, &profile_file_name(name))
            .await
            .map_err(|e| StoreError::persist(&link, e))?;

        if let Some(document) = unloaded {
            self.publish_profile(name, document);
        }
        self.set_active(name);
        info!("Activated profile {}", name);
        self.hub.publish_active_profile(name);
        Ok(())
    }

    /// Follows the on-disk `active` pointer: reloads its target and makes it
    /// active in memory.
    pub async fn reload_active(&self) -> Result<String, StoreError> {
        let link = self.paths.active_link();
        let name = match storage::read_link_target(&link).await {
            Ok(name) => name,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::ProfileNotFound(storage::ACTIVE_LINK.to_string()))
            }
            Err(e) => return Err(StoreError::io(link, e)),
        };

        self.reload_one(&name).await?;

        let changed = self.active_name().as_deref() != Some(name.as_str());
        self.set_active(&name);
        if changed {
            info!("Active profile is now {}", name);
            self.hub.publish_active_profile(&name);
        }
        Ok(name)
    }

    /// First-run bootstrap: writes the device template as `default.json` and
    /// points `active` at it when no pointer exists yet. Returns whether
    /// anything was created.
    pub async fn create_if_missing(&self) -> Result<bool, StoreError> {
        let link = self.paths.active_link();
        if storage::link_exists(&link)
            .await
            .map_err(|e| StoreError::io(&link, e))?
        {
            return Ok(false);
        }

        let default_path = self.profile_path(DEFAULT_PROFILE);
        let has_default = tokio::fs::try_exists(&default_path)
            .await
            .map_err(|e| StoreError::io(&default_path, e))?;
        if !has_default {
            info!("Creating default profile from device template");
            self.write_template(DEFAULT_PROFILE).await?;
        }

        storage::swap_link(&link, &profile_file_name(DEFAULT_PROFILE))
            .await
            .map_err(|e| StoreError::persist(&link, e))?;
        Ok(true)
    }

    async fn write_template(&self, name: &str) -> Result<(), StoreError> {
        let template = template_for(self.product_id)?;
        let path = self.profile_path(name);
        storage::write_atomic(&path, template.as_bytes())
            .await
            .map_err(|e| StoreError::persist(&path, e))?;
        self.reload_one(name).await
    }

    // ---- editing ---------------------------------------------------------

    /// Creates a new profile from the device template. Dots are stripped from
    /// the name and surrounding whitespace trimmed.
    pub async fn create_profile(&self, raw_name: &str) -> Result<String, StoreError> {
        let name = sanitize_profile_name(raw_name)
            .ok_or_else(|| StoreError::InvalidName(raw_name.to_string()))?;

        let path = self.profile_path(&name);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?
        {
            return Err(StoreError::AlreadyExists(name));
        }

        self.write_template(&name).await?;
        info!("Created profile {}", name);
        Ok(name)
    }

    /// Deletes the document on disk and drops it from memory.
    pub async fn delete_profile(&self, name: &str) -> Result<(), StoreError> {
        let path = self.profile_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::ProfileNotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::persist(path, e)),
        }
        self.remove_one(name);
        Ok(())
    }

    /// Writes the in-memory document of `name` to disk.
    pub async fn save_profile(&self, name: &str) -> Result<(), StoreError> {
        let _disk = self.disk.lock().await;
        let document = self
            .document(name)
            .ok_or_else(|| StoreError::ProfileNotFound(name.to_string()))?;
        self.persist(name, &document).await
    }

    async fn persist(&self, name: &str, document: &ProfileDocument) -> Result<(), StoreError> {
        let path = self.profile_path(name);
        let bytes = document.to_json()?;
        storage::write_atomic(&path, &bytes).await.map_err(|e| {
            error!("Failed to save profile {}: {}", name, e);
            StoreError::persist(path, e)
        })
    }

    /// Applies `edit` to a copy of the current document, publishes the result
    /// and persists it. A failed write leaves the published state in place.
    async fn edit_profile<F>(&self, name: &str, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ProfileDocument),
    {
        let _disk = self.disk.lock().await;
        let document = {
            let _guard = self.lock_writes();
            let current = self
                .document(name)
                .ok_or_else(|| StoreError::ProfileNotFound(name.to_string()))?;
            let mut document = ProfileDocument::clone(&current);
            edit(&mut document);
            self.publish_locked(name, Arc::new(document))
        };
        self.persist(name, &document).await
    }

    pub async fn update_binding(
        &self,
        name: &str,
        slot: BindingSlot,
        index: u8,
        bindings: Vec<OutputBinding>,
    ) -> Result<(), StoreError> {
        debug!("Updating {:?} {} of {} to {:?}", slot, index, name, bindings);
        self.edit_profile(name, |doc| doc.update_binding(slot, index, bindings))
            .await
    }

    pub async fn clear_all_bindings(&self, name: &str) -> Result<(), StoreError> {
        info!("Clearing all bindings of {}", name);
        self.edit_profile(name, ProfileDocument::clear_bindings).await
    }

    /// Window patterns and deadzone; empty patterns remove the rule.
    pub async fn update_settings(
        &self,
        name: &str,
        name_pattern: &str,
        class_pattern: &str,
        deadzone: i16,
    ) -> Result<(), StoreError> {
        self.edit_profile(name, |doc| {
            doc.update_settings(name_pattern, class_pattern, deadzone)
        })
        .await
    }

    /// Announces that an editor opened `name`.
    pub fn select_profile(&self, name: &str) -> Result<(), StoreError> {
        if !self.snapshot().contains(name) {
            return Err(StoreError::ProfileNotFound(name.to_string()));
        }
        self.hub.publish_selected_profile(name);
        Ok(())
    }

    // ---- metadata --------------------------------------------------------

    /// Loads `metadata.json`; a missing or unreadable file yields defaults.
    pub async fn load_metadata(&self) -> Arc<Metadata> {
        let path = &self.paths.metadata_file;
        let metadata = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                Metadata::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Metadata::default(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Metadata::default()
            }
        };
        debug!("Device metadata: {:?}", metadata);
        let metadata = Arc::new(metadata);
        self.metadata.send_replace(metadata.clone());
        metadata
    }

    /// Publishes new metadata, then writes it to disk.
    pub async fn update_metadata(&self, metadata: Metadata) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StoreError::persist(&self.paths.metadata_file, io::Error::other(e)))?;
        self.metadata.send_replace(Arc::new(metadata));

        let path = &self.paths.metadata_file;
        storage::write_atomic(path, &bytes)
            .await
            .map_err(|e| StoreError::persist(path, e))
    }
}

/// Strips dots (and with them any `.json` suffix) and trims whitespace.
/// Path separators are rejected.
pub fn sanitize_profile_name(raw: &str) -> Option<String> {
    let name: String = raw.replace('.', "").trim().to_string();
    if name.is_empty() || name == storage::ACTIVE_LINK || name.contains(['/', '\\', '\0']) {
        return None;
    }
    Some(name)
}

/// Single owner of the press/release state, bound to the active profile
///
/// Resolution state is only touched through `&mut self`, so it can never be
/// mutated from two tasks at once.
pub struct Resolver {
    active: watch::Receiver<ActiveProfile>,
    state: ResolutionState,
    current: Option<String>,
}

impl Resolver {
    fn new(mut active: watch::Receiver<ActiveProfile>) -> Self {
        let current = active.borrow_and_update().name.clone();
        Self {
            active,
            state: ResolutionState::new(),
            current,
        }
    }

    /// Resolves against the active mapping; nothing happens without one.
    ///
    /// If the active profile changed since the last call, everything still
    /// held is released first and reported in `released`.
    pub fn resolve(&mut self, event: RawEvent) -> Resolution {
        // name and mapping from the same published value
        let ActiveProfile { name, mapping } = self.active.borrow_and_update().clone();
        let switched = self.switch_to(name);

        let mut resolution = match mapping {
            Some(mapping) => mapping.resolve(&mut self.state, event),
            None => Resolution::default(),
        };
        if !switched.is_empty() {
            let mut released = switched;
            released.append(&mut resolution.released);
            resolution.released = released;
        }
        resolution
    }

    /// Releases everything if the active profile name changed.
    pub fn sync_profile(&mut self) -> Vec<OutputBinding> {
        let name = self.active.borrow_and_update().name.clone();
        self.switch_to(name)
    }

    fn switch_to(&mut self, name: Option<String>) -> Vec<OutputBinding> {
        if name == self.current {
            return Vec::new();
        }
        debug!("Profile switch {:?} -> {:?}", self.current, name);
        self.current = name;
        self.state.release_all()
    }

    /// Waits until the active profile is replaced or refreshed.
    pub async fn profile_changed(&mut self) {
        if self.active.changed().await.is_err() {
            // store dropped; nothing will ever change again
            std::future::pending::<()>().await;
        }
    }

    pub fn release_all(&mut self) -> Vec<OutputBinding> {
        self.state.release_all()
    }

    pub fn active_name(&self) -> Option<String> {
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{HatDirection, KeyMode};
    use tempfile::TempDir;

    const CLASSIC: u16 = 3903;

    fn key(code: u16) -> OutputBinding {
        OutputBinding::keyboard(code)
    }

    async fn store_in(dir: &TempDir) -> ProfileStore {
        let paths = DevicePaths::new(dir.path(), "TEST01");
        paths.ensure_dirs().await.unwrap();
        ProfileStore::new(paths, CLASSIC, EventHub::new(8))
    }

    fn write_profile(store: &ProfileStore, name: &str, json: &str) {
        std::fs::write(store.profile_path(name), json).unwrap();
    }

    #[test]
    fn test_sanitize_profile_name() {
        assert_eq!(sanitize_profile_name(" racing.json "), Some("racingjson".into()));
        assert_eq!(sanitize_profile_name("v1.2"), Some("v12".into()));
        assert_eq!(sanitize_profile_name("  "), None);
        assert_eq!(sanitize_profile_name("..."), None);
        assert_eq!(sanitize_profile_name("a/b"), None);
        assert_eq!(sanitize_profile_name("active"), None);
    }

    #[test]
    fn test_window_rule_matching() {
        let rule = WindowRule::compile(
            "steam",
            &WindowMatch {
                name_pattern: Some("^Steam$".into()),
                class_pattern: Some("steamwebhelper".into()),
            },
        )
        .unwrap();
        assert!(rule.matches("Steam", "other"));
        assert!(rule.matches("Friends", "steamwebhelper"));
        assert!(!rule.matches("Steam Settings", "firefox"));

        assert!(WindowRule::compile("x", &WindowMatch::default()).is_none());
        let invalid = WindowMatch {
            name_pattern: Some("(".into()),
            class_pattern: None,
        };
        assert!(WindowRule::compile("x", &invalid).is_none());
    }

    #[tokio::test]
    async fn test_create_if_missing_bootstraps_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        assert!(store.create_if_missing().await.unwrap());
        assert!(!store.create_if_missing().await.unwrap());

        assert_eq!(store.reload_active().await.unwrap(), "default");
        assert_eq!(store.active_name().as_deref(), Some("default"));
        assert!(store.active().mapping.is_some());
    }

    #[tokio::test]
    async fn test_create_if_missing_unknown_device() {
        let dir = TempDir::new().unwrap();
        let paths = DevicePaths::new(dir.path(), "X");
        paths.ensure_dirs().await.unwrap();
        let store = ProfileStore::new(paths, 1, EventHub::default());

        assert!(matches!(
            store.create_if_missing().await,
            Err(StoreError::UnknownDevice(1))
        ));
    }

    #[tokio::test]
    async fn test_load_all_skips_broken_profiles() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "good", r#"{"buttons": {"1": [{"code": 30, "mode": 0}]}}"#);
        write_profile(&store, "broken", "{ not json");
        write_profile(&store, "Alpha", r#"{"window_profiles": {"class": "alpha"}}"#);

        assert_eq!(store.load_all().await.unwrap(), 2);
        let names: Vec<_> = store.list_profiles().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alpha", "good"]);
        assert_eq!(store.window_rules().len(), 1);
        assert_eq!(store.match_window("whatever", "alpha").as_deref(), Some("Alpha"));
    }

    #[tokio::test]
    async fn test_legacy_profile_is_migrated_and_written_back() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "old", r#"{"buttons": {"5": {"code": 30, "mode": 0}}}"#);

        store.reload_one("old").await.unwrap();
        assert_eq!(store.document("old").unwrap().buttons[&5], vec![key(30)]);

        let path = store.profile_path("old");
        let mut migrated_on_disk = false;
        for _ in 0..50 {
            let bytes = std::fs::read(&path).unwrap();
            if let Ok(parsed) = parse_document(&bytes) {
                if !parsed.migrated {
                    migrated_on_disk = true;
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(migrated_on_disk);
    }

    #[tokio::test]
    async fn test_activate_swaps_pointer_and_broadcasts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.create_if_missing().await.unwrap();
        write_profile(&store, "racing", "{}");
        store.load_all().await.unwrap();
        let mut sub = store.hub().subscribe();

        store.activate("racing").await.unwrap();
        assert_eq!(store.active_name().as_deref(), Some("racing"));
        assert_eq!(
            std::fs::read_link(store.paths().active_link()).unwrap(),
            PathBuf::from("racing.json")
        );
        let event = sub.recv().await.unwrap();
        assert_eq!(
            event.payload,
            crate::broadcast::HubPayload::ActiveProfile("racing".into())
        );

        assert!(matches!(
            store.activate("missing").await,
            Err(StoreError::ProfileNotFound(_))
        ));
        assert_eq!(store.active_name().as_deref(), Some("racing"));
    }

    #[tokio::test]
    async fn test_concurrent_activation_leaves_valid_pointer() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir).await);
        for name in ["a", "b", "c"] {
            write_profile(&store, name, "{}");
        }
        store.load_all().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..30 {
            let store = store.clone();
            let name = ["a", "b", "c"][i % 3];
            tasks.push(tokio::spawn(async move { store.activate(name).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let on_disk = storage::read_link_target(&store.paths().active_link())
            .await
            .unwrap();
        assert_eq!(store.active_name(), Some(on_disk));
    }

    #[tokio::test]
    async fn test_update_binding_recompiles_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "p", "{}");
        store.load_all().await.unwrap();
        store.activate("p").await.unwrap();
        let mut resolver = store.resolver();

        assert!(resolver.resolve(RawEvent::button(2, 1)).is_empty());

        store
            .update_binding("p", BindingSlot::Button, 2, vec![key(57)])
            .await
            .unwrap();
        assert_eq!(resolver.resolve(RawEvent::button(2, 1)).pressed, vec![key(57)]);

        let on_disk = parse_document(&std::fs::read(store.profile_path("p")).unwrap())
            .unwrap()
            .document;
        assert_eq!(on_disk.buttons[&2], vec![key(57)]);

        assert!(matches!(
            store.update_binding("nope", BindingSlot::Button, 0, vec![]).await,
            Err(StoreError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_and_settings() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(
            &store,
            "p",
            r#"{"hats": {"0": {"up": [{"code": 103, "mode": 0}]}}}"#,
        );
        store.load_all().await.unwrap();

        store.clear_all_bindings("p").await.unwrap();
        assert_eq!(
            store.bindings("p", BindingSlot::Hat(HatDirection::Up), 0).unwrap(),
            vec![OutputBinding::UNBOUND]
        );

        store.update_settings("p", "", "^game$", 5000).await.unwrap();
        assert_eq!(store.document("p").unwrap().axis_deadzone, 5000);
        assert_eq!(store.match_window("x", "game").as_deref(), Some("p"));

        store.update_settings("p", "", "", 5000).await.unwrap();
        assert!(store.window_rules().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_delete_profile() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let name = store.create_profile(" Racing.json ").await.unwrap();
        assert_eq!(name, "Racingjson");
        assert!(store.document("Racingjson").is_some());
        assert!(matches!(
            store.create_profile("Racingjson").await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.create_profile(" . ").await,
            Err(StoreError::InvalidName(_))
        ));

        store.delete_profile("Racingjson").await.unwrap();
        assert!(store.document("Racingjson").is_none());
        assert!(matches!(
            store.delete_profile("Racingjson").await,
            Err(StoreError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_active_profile_stops_resolution() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "p", r#"{"buttons": {"0": [{"code": 2, "mode": 0}]}}"#);
        store.load_all().await.unwrap();
        store.activate("p").await.unwrap();
        let mut resolver = store.resolver();

        store.remove_one("p");
        assert!(store.active().mapping.is_none());
        assert_eq!(store.active_name().as_deref(), Some("p"));
        assert!(resolver.resolve(RawEvent::button(0, 1)).is_empty());
    }

    #[tokio::test]
    async fn test_resolver_releases_on_profile_switch() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "a", r#"{"buttons": {"0": [{"code": 30, "mode": 0}]}}"#);
        write_profile(&store, "b", r#"{"buttons": {"0": [{"code": 48, "mode": 0}]}}"#);
        store.load_all().await.unwrap();
        store.activate("a").await.unwrap();

        let mut resolver = store.resolver();
        assert_eq!(resolver.resolve(RawEvent::button(0, 1)).pressed, vec![key(30)]);

        store.activate("b").await.unwrap();
        let r = resolver.resolve(RawEvent::button(0, 0));
        assert_eq!(r.released, vec![key(30)]);
        assert!(r.pressed.is_empty());

        assert_eq!(resolver.resolve(RawEvent::button(0, 1)).pressed, vec![key(48)]);
        assert_eq!(resolver.release_all(), vec![key(48)]);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        assert_eq!(*store.load_metadata().await, Metadata::default());

        let mut rx = store.subscribe_metadata();
        let metadata = Metadata {
            is_opposite_hand: false,
            exclusive_access: true,
            invert_axes: true,
        };
        store.update_metadata(metadata.clone()).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().exclusive_access);

        let reopened = store_in(&dir).await;
        assert_eq!(*reopened.load_metadata().await, metadata);

        std::fs::write(&store.paths().metadata_file, "garbage").unwrap();
        assert_eq!(*store.load_metadata().await, Metadata::default());
    }

    #[tokio::test]
    async fn test_select_profile_broadcasts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "p", "{}");
        store.load_all().await.unwrap();
        let mut sub = store.hub().subscribe();

        store.select_profile("p").unwrap();
        assert_eq!(
            sub.recv().await.unwrap().payload,
            crate::broadcast::HubPayload::SelectedProfile("p".into())
        );
        assert!(store.select_profile("q").is_err());
    }

    #[tokio::test]
    async fn test_mouse_bindings_survive_reload() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "p", r#"{"buttons": {"3": [{"code": 272, "mode": 1}]}}"#);
        store.reload_one("p").await.unwrap();
        let binding = store.bindings("p", BindingSlot::Button, 3).unwrap()[0];
        assert_eq!(binding.mode, KeyMode::Mouse);
        assert_eq!(binding.code, 0x110);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_edits_leave_disk_equal_to_memory() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir).await);
        write_profile(&store, "p", "{}");
        store.load_all().await.unwrap();

        for round in 0..5u16 {
            let edits: Vec<_> = (0..32u8)
                .map(|index| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        store
                            .update_binding("p", BindingSlot::Button, index, vec![key(30 + round)])
                            .await
                    })
                })
                .collect();
            for edit in edits {
                edit.await.unwrap().unwrap();
            }

            let on_disk = parse_document(&std::fs::read(store.profile_path("p")).unwrap())
                .unwrap()
                .document;
            let in_memory = store.document("p").unwrap();
            assert_eq!(on_disk, *in_memory, "round {}", round);
            assert_eq!(in_memory.buttons.len(), 32);
        }
    }

    #[tokio::test]
    async fn test_resolver_uses_mapping_of_the_profile_it_reports() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "a", r#"{"buttons": {"0": [{"code": 30, "mode": 0}]}}"#);
        write_profile(&store, "b", r#"{"buttons": {"1": [{"code": 48, "mode": 0}]}}"#);
        store.load_all().await.unwrap();
        store.activate("a").await.unwrap();
        let mut resolver = store.resolver();

        store.activate("b").await.unwrap();
        let r = resolver.resolve(RawEvent::button(1, 1));
        assert_eq!(resolver.active_name().as_deref(), Some("b"));
        assert_eq!(r.pressed, vec![key(48)]);
        // the switch was consumed together with the mapping
        assert!(resolver.sync_profile().is_empty());
    }

    #[tokio::test]
    async fn test_activate_unparsable_profile_keeps_pointer() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "good", "{}");
        store.load_all().await.unwrap();
        store.activate("good").await.unwrap();
        write_profile(&store, "broken", "{not json");

        assert!(matches!(
            store.activate("broken").await,
            Err(StoreError::Parse { .. })
        ));
        let link = store.paths().active_link();
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            PathBuf::from("good.json")
        );
        assert_eq!(store.active_name().as_deref(), Some("good"));
        assert!(store.document("broken").is_none());
    }

    #[tokio::test]
    async fn test_snapshot_maps_agree_after_reload_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        write_profile(&store, "a", r#"{"window_profiles": {"class": "x"}}"#);
        write_profile(&store, "b", "{}");
        store.load_all().await.unwrap();

        store.remove_one("a");
        let snapshot = store.snapshot();
        assert!(!snapshot.contains("a"));
        assert!(!snapshot.compiled.contains_key("a"));
        assert!(snapshot.window_rules.is_empty());

        store.reload_one("a").await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.compiled.len(), 2);
        assert_eq!(snapshot.documents.len(), 2);
        assert_eq!(snapshot.window_rules.len(), 1);
    }
}
