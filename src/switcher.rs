//! Activates profiles based on the focused X11 window
//!
//! ```text
//! every window_poll_ms:
//!   WindowProbe::focused_window ──► id changed? ──► first matching WindowRule
//!                                                        │
//!                                      already active? ◄─┘──► ProfileStore::activate
//! ```

use crate::persistence::ProfileStore;
use std::future::Future;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum SwitcherError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub name: String,
    pub class: String,
}

pub trait WindowProbe: Send {
    /// `None` when no window has focus
    fn focused_window(
        &mut self,
    ) -> impl Future<Output = Result<Option<WindowInfo>, SwitcherError>> + Send;
}

/// Whether window watching can run in this session
pub fn auto_switch_available(disabled_by_flag: bool) -> bool {
    if disabled_by_flag {
        info!("Active window watching disabled by flag");
        return false;
    }
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        info!("Active window watching disabled on wayland");
        return false;
    }
    true
}

/// Class part of `xprop WM_CLASS` output: the second element when there are
/// two or more, otherwise the only one.
pub fn parse_wm_class(output: &str) -> String {
    let Some((_, values)) = output.split_once('=') else {
        return String::new();
    };
    let parts: Vec<&str> = values
        .split(',')
        .map(|part| part.trim().trim_matches('"'))
        .collect();
    match parts.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [_, class, ..] => class.to_string(),
    }
}

/// Reads the focused window through `xdotool` and `xprop`
#[derive(Debug, Default)]
pub struct X11Probe;

impl X11Probe {
    async fn run(program: &str, args: &[&str]) -> Result<String, SwitcherError> {
        let command = format!("{} {}", program, args.join(" "));
        let Output {
            status,
            stdout,
            stderr,
        } = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| SwitcherError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SwitcherError::Failed {
                command,
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

impl WindowProbe for X11Probe {
    async fn focused_window(&mut self) -> Result<Option<WindowInfo>, SwitcherError> {
        let id = Self::run("xdotool", &["getwindowfocus"]).await?;
        if id.is_empty() {
            return Ok(None);
        }
        let name = Self::run("xdotool", &["getwindowname", &id]).await?;
        let class = parse_wm_class(&Self::run("xprop", &["-id", &id, "WM_CLASS"]).await?);
        Ok(Some(WindowInfo { id, name, class }))
    }
}

pub struct AutoSwitcher<P: WindowProbe> {
    store: Arc<ProfileStore>,
    probe: P,
    poll_interval: Duration,
    last_window: Option<String>,
    failing: bool,
}

impl<P: WindowProbe> AutoSwitcher<P> {
    /// A zero `poll_interval` is raised to one millisecond.
    pub fn new(store: Arc<ProfileStore>, probe: P, poll_interval: Duration) -> Self {
        Self {
            store,
            probe,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            last_window: None,
            failing: false,
        }
    }

    /// One probe; activates the matching profile when the focused window
    /// changed. Returns the activated profile, if any.
    pub async fn poll_once(&mut self) -> Option<String> {
        let window = match self.probe.focused_window().await {
            Ok(window) => {
                self.failing = false;
                window?
            }
            Err(e) => {
                // log the first failure of a streak only
                if !self.failing {
                    warn!("Failed to read focused window: {}", e);
                    self.failing = true;
                }
                return None;
            }
        };

        if self.last_window.as_deref() == Some(window.id.as_str()) {
            return None;
        }
        debug!("Focused window {} {:?} ({})", window.id, window.name, window.class);
        self.last_window = Some(window.id);

        let profile = self.store.match_window(&window.name, &window.class)?;
        if self.store.active_name().as_deref() == Some(profile.as_str()) {
            return None;
        }

        match self.store.activate(&profile).await {
            Ok(()) => {
                info!("Switched to profile {} for window {:?}", profile, window.name);
                Some(profile)
            }
            Err(e) => {
                warn!("Failed to activate profile {}: {}", profile, e);
                None
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Watching active windows every {:?}", self.poll_interval);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Window watcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::EventHub;
    use crate::persistence::DevicePaths;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct ScriptedProbe(VecDeque<Result<Option<WindowInfo>, SwitcherError>>);

    impl WindowProbe for ScriptedProbe {
        async fn focused_window(&mut self) -> Result<Option<WindowInfo>, SwitcherError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    fn window(id: &str, name: &str, class: &str) -> Result<Option<WindowInfo>, SwitcherError> {
        Ok(Some(WindowInfo {
            id: id.into(),
            name: name.into(),
            class: class.into(),
        }))
    }

    #[test]
    fn test_parse_wm_class() {
        assert_eq!(
            parse_wm_class(r#"WM_CLASS(STRING) = "steamwebhelper", "steam""#),
            "steam"
        );
        assert_eq!(parse_wm_class(r#"WM_CLASS(STRING) = "xterm""#), "xterm");
        assert_eq!(parse_wm_class("WM_CLASS:  not found."), "");
    }

    #[tokio::test]
    async fn test_switches_on_window_change_only() {
        let dir = TempDir::new().unwrap();
        let paths = DevicePaths::new(dir.path(), "SW");
        paths.ensure_dirs().await.unwrap();
        std::fs::write(
            paths.profiles_dir.join("game.json"),
            r#"{"window_profiles": {"class": "^game$"}}"#,
        )
        .unwrap();
        std::fs::write(
            paths.profiles_dir.join("editor.json"),
            r#"{"window_profiles": {"name": "Editor"}}"#,
        )
        .unwrap();
        let store = Arc::new(ProfileStore::new(paths, 3903, EventHub::default()));
        store.load_all().await.unwrap();

        let probe = ScriptedProbe(VecDeque::from([
            window("1", "Some Game", "game"),
            window("1", "Some Game", "game"),
            Err(SwitcherError::Spawn {
                command: "xdotool".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
            window("2", "Text Editor", "code"),
            window("3", "Terminal", "xterm"),
            window("4", "Other Game", "game"),
        ]));
        let mut switcher = AutoSwitcher::new(store.clone(), probe, Duration::from_millis(1));

        assert_eq!(switcher.poll_once().await.as_deref(), Some("game"));
        assert_eq!(switcher.poll_once().await, None);
        assert_eq!(switcher.poll_once().await, None);
        assert_eq!(switcher.poll_once().await.as_deref(), Some("editor"));
        // no rule matches: the active profile stays
        assert_eq!(switcher.poll_once().await, None);
        assert_eq!(store.active_name().as_deref(), Some("editor"));
        assert_eq!(switcher.poll_once().await.as_deref(), Some("game"));
    }

    #[tokio::test]
    async fn test_zero_poll_interval_does_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let paths = DevicePaths::new(dir.path(), "SW0");
        paths.ensure_dirs().await.unwrap();
        let store = Arc::new(ProfileStore::new(paths, 3903, EventHub::default()));

        let switcher = AutoSwitcher::new(store, ScriptedProbe(VecDeque::new()), Duration::ZERO);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(switcher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
