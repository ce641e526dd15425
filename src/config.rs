use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "retroprint.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub keybindings: Keybindings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub database_url: String,
    pub api_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            database_url: "sqlite:retroprint.db?mode=rwc".to_string(),
            api_base_url: "http://localhost:8080/api".to_string(),
        }
    }
}

/// What happens to an optimistic local change when persisting it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPolicy {
    /// Every persisted mutation is reverted on failure.
    #[default]
    Unified,
    /// Only reminder toggles revert; deletes, drags and restyles keep the
    /// local value.
    Legacy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub rollback: RollbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub quit: Vec<String>,
    pub compose: Vec<String>,
    pub print: Vec<String>,
    pub newline: Vec<String>,
    pub draft_reminder: Vec<String>,
    pub print_photo: Vec<String>,
    pub next_card: Vec<String>,
    pub prev_card: Vec<String>,
    pub pin: Vec<String>,
    pub reminder: Vec<String>,
    pub delete: Vec<String>,
    pub cycle_style: Vec<String>,
    pub grab: Vec<String>,
    pub drop: Vec<String>,
    pub move_left: Vec<String>,
    pub move_right: Vec<String>,
    pub move_up: Vec<String>,
    pub move_down: Vec<String>,
    pub cancel: Vec<String>,
    pub cycle_theme: Vec<String>,
    pub cycle_printer: Vec<String>,
    pub cycle_default_color: Vec<String>,
    pub cycle_default_photo: Vec<String>,
    pub dismiss_error: Vec<String>,
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

impl Default for Keybindings {
    fn default() -> Self {
        Self {
            quit: keys(&["q"]),
            compose: keys(&["n", "Enter"]),
            print: keys(&["Enter"]),
            newline: keys(&["alt-Enter"]),
            draft_reminder: keys(&["ctrl-r"]),
            print_photo: keys(&["i"]),
            next_card: keys(&["Tab", "j"]),
            prev_card: keys(&["BackTab", "k"]),
            pin: keys(&["p"]),
            reminder: keys(&["r"]),
            delete: keys(&["d", "Backspace"]),
            cycle_style: keys(&["c"]),
            grab: keys(&["m", " "]),
            drop: keys(&["Enter", " "]),
            move_left: keys(&["h", "Left"]),
            move_right: keys(&["l", "Right"]),
            move_up: keys(&["k", "Up"]),
            move_down: keys(&["j", "Down"]),
            cancel: keys(&["Esc"]),
            cycle_theme: keys(&["t"]),
            cycle_printer: keys(&["s"]),
            cycle_default_color: keys(&["C"]),
            cycle_default_photo: keys(&["P"]),
            dismiss_error: keys(&["x"]),
        }
    }
}

pub fn parse_key_string(key_str: &str) -> (KeyCode, KeyModifiers) {
    // A lone "-" is the minus key, not a separator.
    if key_str == "-" {
        return (KeyCode::Char('-'), KeyModifiers::empty());
    }

    let mut parts: Vec<&str> = key_str.split('-').collect();
    let mut modifiers = KeyModifiers::empty();

    // We process from the end to find the base key, then consume prefixes
    let base_key_str = parts.pop().unwrap_or("");

    for part in parts {
        match part.to_lowercase().as_str() {
            "ctrl" => modifiers.insert(KeyModifiers::CONTROL),
            "alt" => modifiers.insert(KeyModifiers::ALT),
            "shift" => modifiers.insert(KeyModifiers::SHIFT),
            "cmd" | "command" | "super" => modifiers.insert(KeyModifiers::SUPER),
            "meta" => modifiers.insert(KeyModifiers::META),
            _ => {}
        }
    }

    let mut chars = base_key_str.chars();
    let code = match base_key_str {
        "Backspace" => KeyCode::Backspace,
        "Enter" => KeyCode::Enter,
        "Left" => KeyCode::Left,
        "Right" => KeyCode::Right,
        "Up" => KeyCode::Up,
        "Down" => KeyCode::Down,
        "Tab" => KeyCode::Tab,
        "BackTab" => KeyCode::BackTab,
        "Esc" => KeyCode::Esc,
        "Delete" => KeyCode::Delete,
        " " | "Space" => KeyCode::Char(' '),
        _ => match (chars.next(), chars.next()) {
            (Some(c), None) => KeyCode::Char(c),
            _ => KeyCode::Null,
        },
    };

    (code, modifiers)
}

pub fn matches_key(event: KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| {
        let (code, modifiers) = parse_key_string(b);
        event.code == code && event.modifiers.contains(modifiers)
    })
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    /// Reads the config file, falling back to defaults when it is missing or
    /// unparsable.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_key_string_modifiers() {
        assert_eq!(
            parse_key_string("ctrl-r"),
            (KeyCode::Char('r'), KeyModifiers::CONTROL)
        );
        assert_eq!(
            parse_key_string("alt-Enter"),
            (KeyCode::Enter, KeyModifiers::ALT)
        );
        assert_eq!(parse_key_string("q"), (KeyCode::Char('q'), KeyModifiers::empty()));
        assert_eq!(parse_key_string("-"), (KeyCode::Char('-'), KeyModifiers::empty()));
        assert_eq!(parse_key_string("nonsense").0, KeyCode::Null);
    }

    #[test]
    fn test_matches_key_requires_modifiers() {
        let bindings = vec!["ctrl-r".to_string()];
        let plain = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::empty());
        let ctrl = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL);
        assert!(!matches_key(plain, &bindings));
        assert!(matches_key(ctrl, &bindings));
    }

    #[test]
    fn test_uppercase_binding_matches_shifted_char() {
        let bindings = vec!["C".to_string()];
        let event = KeyEvent::new(KeyCode::Char('C'), KeyModifiers::SHIFT);
        assert!(matches_key(event, &bindings));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent.toml"));
        assert_eq!(config.storage.mode, StorageMode::Local);
        assert_eq!(config.behavior.rollback, RollbackPolicy::Unified);
        assert_eq!(config.keybindings.quit, vec!["q".to_string()]);
    }

    #[test]
    fn test_partial_file_overrides_only_given_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[storage]
mode = "remote"
api_base_url = "http://printer.local/api"

[behavior]
rollback = "legacy"

[keybindings]
quit = ["ctrl-c"]
"#
        )
        .unwrap();

        let config = Config::load_from(file.path());
        assert_eq!(config.storage.mode, StorageMode::Remote);
        assert_eq!(config.storage.api_base_url, "http://printer.local/api");
        assert_eq!(
            config.storage.database_url,
            StorageConfig::default().database_url
        );
        assert_eq!(config.behavior.rollback, RollbackPolicy::Legacy);
        assert_eq!(config.keybindings.quit, vec!["ctrl-c".to_string()]);
        assert_eq!(config.keybindings.pin, vec!["p".to_string()]);
    }

    #[test]
    fn test_garbage_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let config = Config::load_from(file.path());
        assert_eq!(config.storage.mode, StorageMode::Local);
    }
}
