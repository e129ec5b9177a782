//! Application vs background classification of pids

use crate::config::ClassifierConfig;
use crate::resolver::WindowPids;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::MetadataExt;
use tracing::debug;

/// Desktop plumbing: session daemons, compositors, audio, portals.
const DESKTOP_DAEMONS: &[&str] = &[
    "systemd", "dbus-daemon", "systemd-resolved", "systemd-timesyncd",
    "systemd-logind", "systemd-journald", "systemd-udevd",
    "xorg", "xwayland", "kwin_x11", "kwin_wayland",
    "mutter", "gnome-shell", "plasmashell",
    "pulseaudio", "pipewire", "pipewire-pulse", "wireplumber",
    "kded5", "kded6", "ksmserver", "kglobalaccel5",
    "gvfsd", "gvfsd-fuse", "gvfsd-metadata",
    "at-spi-bus-launcher", "at-spi2-registryd",
    "ibus-daemon", "ibus-portal", "fcitx5",
    "xdg-desktop-portal", "xdg-desktop-portal-gtk", "xdg-desktop-portal-kde",
    "polkit-kde-authentication-agent-1", "polkitd",
    "chrome_crashpad_handler", "crashpad_handler",
];

/// Shells, sandboxes and interpreters that usually parent the real app.
const LAUNCHERS: &[&str] = &[
    "bash", "zsh", "sh", "fish", "dash", "ksh",
    "bwrap", "snap-confine", "firejail",
    "python", "python3", "python2", "perl", "ruby", "node",
    "init",
];

const HELPER_TOKENS: &[&str] = &["crashpad", "helper", "zygote", "nacl_helper"];

const APP_PATTERNS: &[&str] = &[
    "chrome", "firefox", "brave", "edge", "opera", "vivaldi", "chromium",
    "code", "visual studio", "pycharm", "intellij", "eclipse", "sublime",
    "atom", "cursor", "gedit", "kate", "neovim", "vim",
    "slack", "discord", "teams", "zoom", "skype", "telegram", "signal",
    "spotify", "vlc", "mpv", "rhythmbox", "clementine", "audacity",
    "gimp", "inkscape", "blender", "krita", "darktable",
    "libreoffice", "writer", "calc", "impress",
    "dolphin", "nautilus", "thunar", "nemo", "pcmanfm",
    "konsole", "gnome-terminal", "tilix", "alacritty", "kitty", "wezterm",
    "thunderbird", "evolution", "geary",
    "docker", "postman", "insomnia", "dbeaver",
    "obs", "kdenlive", "handbrake", "shotcut",
];

/// Which user a process runs as.
pub trait OwnerLookup: Send + Sync {
    /// `None` when the process is gone or unreadable.
    fn owner_uid(&self, pid: u32) -> Option<u32>;
    fn session_uid(&self) -> u32;
}

/// Reads ownership of `/proc/<pid>`.
pub struct ProcOwners {
    session_uid: u32,
}

impl ProcOwners {
    pub fn new() -> Self {
        Self { session_uid: unsafe { libc::getuid() } }
    }
}

impl Default for ProcOwners {
    fn default() -> Self { Self::new() }
}

impl OwnerLookup for ProcOwners {
    fn owner_uid(&self, pid: u32) -> Option<u32> {
        std::fs::metadata(format!("/proc/{}", pid)).ok().map(|m| m.uid())
    }

    fn session_uid(&self) -> u32 {
        self.session_uid
    }
}

pub struct Classifier {
    windows: WindowPids,
    owners: Box<dyn OwnerLookup>,
    background: HashSet<String>,
    app_patterns: Vec<String>,
    cache: HashMap<u32, bool>,
}

impl Classifier {
    pub fn new(windows: WindowPids, owners: Box<dyn OwnerLookup>) -> Self {
        Self::with_config(windows, owners, &ClassifierConfig::default())
    }

    pub fn with_config(
        windows: WindowPids,
        owners: Box<dyn OwnerLookup>,
        config: &ClassifierConfig,
    ) -> Self {
        let background = DESKTOP_DAEMONS
            .iter()
            .chain(LAUNCHERS)
            .map(|s| s.to_string())
            .chain(config.extra_background.iter().map(|s| s.to_lowercase()))
            .collect();
        let app_patterns = APP_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .chain(config.extra_app_patterns.iter().map(|s| s.to_lowercase()))
            .collect();
        Self { windows, owners, background, app_patterns, cache: HashMap::new() }
    }

    /// `true` for an interactive application, `false` for a background process.
    ///
    /// Results are cached per pid. A cached `false` is upgraded once the pid
    /// shows up as a window owner; a cached `true` is never downgraded.
    pub fn classify(&mut self, pid: u32, name: &str) -> bool {
        let windows = self.windows.current();

        if let Some(&cached) = self.cache.get(&pid) {
            if !cached && windows.contains(&pid) {
                debug!(pid, name, "window appeared, promoting to application");
                self.cache.insert(pid, true);
                return true;
            }
            return cached;
        }

        let is_app = self.decide(pid, name, &windows);
        self.cache.insert(pid, is_app);
        is_app
    }

    fn decide(&self, pid: u32, name: &str, windows: &HashSet<u32>) -> bool {
        let name = name.to_lowercase();

        if self.background.contains(&name) {
            return false;
        }
        if HELPER_TOKENS.iter().any(|t| name.contains(t)) {
            return false;
        }
        if windows.contains(&pid) {
            return true;
        }
        if self.app_patterns.iter().any(|p| name.contains(p.as_str())) {
            return true;
        }

        match self.owners.owner_uid(pid) {
            Some(uid) if uid != self.owners.session_uid() => {
                debug!(pid, uid, "foreign owner, background");
            }
            None => debug!(pid, "owner lookup failed, background"),
            Some(_) => {}
        }
        false
    }

    pub fn cached(&self, pid: u32) -> Option<bool> {
        self.cache.get(&pid).copied()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops cache entries for pids not in `live`.
    pub fn purge_absent(&mut self, live: &HashSet<u32>) -> usize {
        let before = self.cache.len();
        self.cache.retain(|pid, _| live.contains(pid));
        before - self.cache.len()
    }
}
