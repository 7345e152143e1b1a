//! Configuration management for `contact_sync`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`CSYNC_*`)
//! 3. Project config (.contact-sync/config.yaml)
//! 4. User config (~/.config/contact-sync/config.yaml)
//! 5. Defaults
//!
//! Keys are kebab-case; export and import settings live under `export.`
//! and `import.` sections, so `CSYNC_EXPORT_SOURCE_GROUPS` sets
//! `export.source-groups`.

use crate::error::{Result, SyncError};
use crate::export::ExportSettings;
use crate::import::ImportSettings;
use crate::lock::DEFAULT_LOCK_TIMEOUT;
use crate::util::{WORKSPACE_DIR, find_workspace_dir, split_list};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for config keys.
pub const ENV_PREFIX: &str = "CSYNC_";
/// Environment variable naming the workspace directory outright.
pub const WORKSPACE_ENV: &str = "CSYNC_WORKSPACE";

const CONFIG_FILENAME: &str = "config.yaml";
const DEFAULT_ACCOUNT_DB: &str = "account.db";
const DEFAULT_WORKBOOK_DB: &str = "workbook.db";
const DEFAULT_SHEET: &str = "Exported_Contacts";
const DEFAULT_LOCK_DIR: &str = "locks";

/// One source of configuration values, keyed by normalized key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `CSYNC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if key == WORKSPACE_ENV {
                continue;
            }
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layer.insert(&env_key(stripped), value);
            }
        }
        layer
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub workspace: Option<PathBuf>,
    pub account: Option<PathBuf>,
    pub principal: Option<String>,
    pub lock_timeout: Option<u64>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(path) = &self.account {
            layer.insert("account-db", path.to_string_lossy());
        }
        if let Some(principal) = &self.principal {
            layer.insert("principal", principal.clone());
        }
        if let Some(lock_timeout) = self.lock_timeout {
            layer.insert("lock-timeout", lock_timeout.to_string());
        }

        layer
    }
}

/// Find the workspace directory.
///
/// Order: explicit path, `CSYNC_WORKSPACE`, the nearest `.contact-sync`
/// above `start`, and finally `<start>/.contact-sync` (created on use).
#[must_use]
pub fn discover_workspace(explicit: Option<&Path>, start: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env::var_os(WORKSPACE_ENV).filter(|value| !value.is_empty()) {
        return PathBuf::from(path);
    }
    find_workspace_dir(start).unwrap_or_else(|| start.join(WORKSPACE_DIR))
}

/// Load project config (.contact-sync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(workspace: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&workspace.join(CONFIG_FILENAME))
}

/// Load user config (~/.config/contact-sync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("contact-sync")
        .join(CONFIG_FILENAME);
    ConfigLayer::from_yaml(&path)
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let defaults = ExportSettings::default();
    let mut layer = ConfigLayer::default();
    layer.insert("export.source-groups", defaults.source_groups.join(","));
    layer.insert("export.mission-group", defaults.mission_group);
    layer.insert("export.exclude-groups", defaults.exclude_groups.join(","));
    layer.insert("export.dedupe-by-number", defaults.dedupe_by_number.to_string());
    layer.insert("sheet", DEFAULT_SHEET);
    layer
}

/// Load configuration with the full precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(workspace: &Path, cli: &CliOverrides) -> Result<ConfigLayer> {
    let defaults = default_config_layer();
    let user = load_user_config()?;
    let project = load_project_config(workspace)?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[
        defaults, user, project, env_layer, cli_layer,
    ]))
}

/// Export settings from a merged layer.
///
/// # Errors
///
/// Returns a validation error when no source group is configured or the
/// dedupe flag is not a boolean.
pub fn export_settings_from_layer(layer: &ConfigLayer) -> Result<ExportSettings> {
    let defaults = ExportSettings::default();
    let source_groups = layer
        .get("export.source-groups")
        .map_or(defaults.source_groups, split_list);
    if source_groups.is_empty() {
        return Err(SyncError::validation(
            "export.source-groups",
            "at least one source group is required",
        ));
    }

    let dedupe_by_number = match layer.get("export.dedupe-by-number") {
        Some(raw) => parse_bool(raw).ok_or_else(|| {
            SyncError::validation(
                "export.dedupe-by-number",
                format!("'{raw}' is not a boolean"),
            )
        })?,
        None => defaults.dedupe_by_number,
    };

    Ok(ExportSettings {
        source_groups,
        mission_group: layer
            .get("export.mission-group")
            .map_or(defaults.mission_group, |value| value.trim().to_string()),
        exclude_groups: layer
            .get("export.exclude-groups")
            .map_or(defaults.exclude_groups, split_list),
        dedupe_by_number,
    })
}

/// Import settings from a merged layer.
#[must_use]
pub fn import_settings_from_layer(layer: &ConfigLayer) -> ImportSettings {
    ImportSettings {
        blocked_principals: layer
            .get("import.blocked-principals")
            .map(split_list)
            .unwrap_or_default(),
    }
}

/// Resolve the invoking principal with fallback to USER and a safe default.
#[must_use]
pub fn resolve_principal(layer: &ConfigLayer) -> String {
    layer
        .get("principal")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| env::var("USER").ok().map(|value| value.trim().to_string()))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run lock wait from `lock-timeout` (milliseconds).
///
/// # Errors
///
/// Returns a validation error when the value is not a whole number.
pub fn lock_timeout_from_layer(layer: &ConfigLayer) -> Result<Duration> {
    layer
        .get("lock-timeout")
        .map_or(Ok(DEFAULT_LOCK_TIMEOUT), |raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| {
                    SyncError::validation("lock-timeout", format!("'{raw}' is not milliseconds"))
                })
        })
}

/// Where a workspace keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    /// Contact account this workspace acts on.
    pub account_db: PathBuf,
    /// Workbook holding the staging sheet.
    pub workbook_db: PathBuf,
    pub sheet: String,
    pub lock_dir: PathBuf,
    /// Base directory for relative photo references.
    pub photo_dir: PathBuf,
}

impl WorkspacePaths {
    /// Resolve paths; relative values are taken from the workspace root.
    #[must_use]
    pub fn resolve(root: &Path, layer: &ConfigLayer) -> Self {
        let path = |key: &str, default: &str| {
            let raw = layer
                .get(key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(default);
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                path
            } else {
                root.join(path)
            }
        };

        Self {
            root: root.to_path_buf(),
            account_db: path("account-db", DEFAULT_ACCOUNT_DB),
            workbook_db: path("workbook-db", DEFAULT_WORKBOOK_DB),
            sheet: layer
                .get("sheet")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_SHEET)
                .to_string(),
            lock_dir: path("lock-dir", DEFAULT_LOCK_DIR),
            photo_dir: path("photo-dir", "."),
        }
    }

    /// Create the workspace and lock directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.lock_dir)?;
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

/// `EXPORT_SOURCE_GROUPS` -> `export.source-groups`.
fn env_key(raw: &str) -> String {
    let lower = raw.to_lowercase();
    for section in ["export", "import"] {
        if let Some(rest) = lower
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{}", rest.replace('_', "-"));
        }
    }
    lower.replace('_', "-")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    for (key, value) in flat {
        layer.insert(&key, value);
    }

    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        serde_yaml::Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layer(pairs: &[(&str, &str)]) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        for (key, value) in pairs {
            layer.insert(key, *value);
        }
        layer
    }

    #[test]
    fn defaults_match_export_settings() {
        let settings = export_settings_from_layer(&default_config_layer()).unwrap();
        assert_eq!(settings, ExportSettings::default());
        assert_eq!(settings.source_groups, ["ICE", "Static", "Roster"]);
    }

    #[test]
    fn merge_precedence_order() {
        let merged = ConfigLayer::merge_layers(&[
            default_config_layer(),
            layer(&[("export.mission-group", "user")]),
            layer(&[("export.mission-group", "project")]),
            layer(&[("export.mission-group", "env")]),
            CliOverrides::default().as_layer(),
        ]);
        assert_eq!(merged.get("export.mission-group"), Some("env"));
    }

    #[test]
    fn cli_overrides_win() {
        let cli = CliOverrides {
            principal: Some("ops@example.org".to_string()),
            lock_timeout: Some(250),
            ..CliOverrides::default()
        };
        let merged = ConfigLayer::merge_layers(&[
            layer(&[("principal", "env@example.org"), ("lock-timeout", "5")]),
            cli.as_layer(),
        ]);
        assert_eq!(resolve_principal(&merged), "ops@example.org");
        assert_eq!(
            lock_timeout_from_layer(&merged).unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn yaml_sections_flatten() {
        let yaml = r"
export:
  source-groups:
    - ICE
    - Static
  mission-group: ''
  dedupe_by_number: false
import:
  blocked-principals: [exporter@example.org]
";
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let layer = layer_from_yaml_value(&value);

        let export = export_settings_from_layer(&layer).unwrap();
        assert_eq!(export.source_groups, ["ICE", "Static"]);
        assert_eq!(export.mission_group, "");
        assert!(!export.dedupe_by_number);
        assert_eq!(export.exclude_groups, ["Roster"]);

        let import = import_settings_from_layer(&layer);
        assert_eq!(import.blocked_principals, ["exporter@example.org"]);
    }

    #[test]
    fn yaml_file_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let layer = load_project_config(temp.path()).unwrap();
        assert!(layer.values.is_empty());
    }

    #[test]
    fn yaml_file_invalid_errors() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILENAME), "export: [unclosed").unwrap();
        assert!(load_project_config(temp.path()).is_err());
    }

    #[test]
    fn env_keys_map_to_sections() {
        let layer = ConfigLayer::from_vars([
            ("CSYNC_EXPORT_SOURCE_GROUPS".to_string(), "A,B".to_string()),
            ("CSYNC_IMPORT_BLOCKED_PRINCIPALS".to_string(), "x".to_string()),
            ("CSYNC_LOCK_TIMEOUT".to_string(), "10".to_string()),
            ("CSYNC_WORKSPACE".to_string(), "/elsewhere".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]);
        assert_eq!(layer.get("export.source-groups"), Some("A,B"));
        assert_eq!(layer.get("import.blocked-principals"), Some("x"));
        assert_eq!(layer.get("lock-timeout"), Some("10"));
        assert_eq!(layer.values.len(), 3);
    }

    #[test]
    fn invalid_values_are_validation_errors() {
        let err = export_settings_from_layer(&layer(&[("export.dedupe-by-number", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));

        let err = export_settings_from_layer(&layer(&[("export.source-groups", " , ")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));

        assert!(lock_timeout_from_layer(&layer(&[("lock-timeout", "soon")])).is_err());
        assert_eq!(
            lock_timeout_from_layer(&ConfigLayer::default()).unwrap(),
            DEFAULT_LOCK_TIMEOUT
        );
    }

    #[test]
    fn workspace_paths_resolve_relative_to_root() {
        let root = Path::new("/work/.contact-sync");
        let paths = WorkspacePaths::resolve(
            root,
            &layer(&[("account-db", "/data/dest.db"), ("lock-dir", "run")]),
        );
        assert_eq!(paths.account_db, PathBuf::from("/data/dest.db"));
        assert_eq!(paths.workbook_db, root.join("workbook.db"));
        assert_eq!(paths.lock_dir, root.join("run"));
        assert_eq!(paths.sheet, "Exported_Contacts");
    }

    #[test]
    fn discover_prefers_explicit_then_nearest() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(temp.path().join(WORKSPACE_DIR)).unwrap();

        let explicit = temp.path().join("custom");
        assert_eq!(discover_workspace(Some(&explicit), &nested), explicit);
        if env::var_os(WORKSPACE_ENV).is_none() {
            assert_eq!(
                discover_workspace(None, &nested),
                temp.path().join(WORKSPACE_DIR)
            );
        }
    }

    #[test]
    fn principal_falls_back() {
        let resolved = resolve_principal(&layer(&[("principal", "  ")]));
        assert!(!resolved.is_empty());
    }
}
