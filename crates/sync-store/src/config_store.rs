//! Durable connection and filter configuration.
//!
//! Two JSON documents live in the config directory:
//! `connect_config.json` (name → connection) and `package_select.json`
//! (the allow/deny filter). Every read re-parses from disk so readers always
//! observe the latest committed write. Writes go to the primary directory
//! first and to the fallback directory when that fails; reads pick the most
//! recently written copy of the two.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use sync_core::error::{Result, SyncError};
use sync_core::models::{Connection, ConnectionField, FieldValue, FilterList};

use crate::json_file::{newest_existing, read_json, write_json_atomic};

/// File holding the connection mapping.
pub const CONNECTIONS_FILE: &str = "connect_config.json";

/// File holding the filter list.
pub const FILTER_FILE: &str = "package_select.json";

/// Connection records keyed by name.
pub type ConnectionMap = BTreeMap<String, Connection>;

// ── ConfigStore ───────────────────────────────────────────────────────────────

/// File-backed configuration with a secondary write location.
///
/// # Example
///
/// ```no_run
/// use sync_store::config_store::ConfigStore;
/// use std::path::PathBuf;
///
/// let store = ConfigStore::new(PathBuf::from("/tmp/notifisync"), None);
/// for (name, conn) in store.load_connections() {
///     println!("{name}: {}", conn.address);
/// }
/// ```
#[derive(Debug)]
pub struct ConfigStore {
    primary_dir: PathBuf,
    fallback_dir: Option<PathBuf>,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(primary_dir: PathBuf, fallback_dir: Option<PathBuf>) -> Self {
        Self {
            primary_dir,
            fallback_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn primary_dir(&self) -> &Path {
        &self.primary_dir
    }

    // ── Connections ───────────────────────────────────────────────────────────

    /// Load all connections, recovering from malformed data with an empty map.
    pub fn load_connections(&self) -> ConnectionMap {
        match self.try_load_connections() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load connections; using empty set");
                ConnectionMap::new()
            }
        }
    }

    /// Load all connections, surfacing parse and read errors.
    pub fn try_load_connections(&self) -> Result<ConnectionMap> {
        let Some(path) = self.locate(CONNECTIONS_FILE) else {
            return Ok(ConnectionMap::new());
        };
        let mut map: ConnectionMap = read_json(&path)?.unwrap_or_default();
        // The map key is authoritative for the record name.
        for (name, conn) in map.iter_mut() {
            if conn.name != *name {
                conn.name = name.clone();
            }
        }
        Ok(map)
    }

    /// Persist the full connection mapping.
    ///
    /// Returns the path that was written.
    pub fn save_connections(&self, connections: &ConnectionMap) -> Result<PathBuf> {
        let _guard = self.lock();
        self.write_with_fallback(CONNECTIONS_FILE, connections)
    }

    /// Store a new connection after validating it.
    pub fn add_connection(&self, connection: Connection) -> Result<()> {
        connection.validate()?;
        let _guard = self.lock();
        let mut map = self.try_load_connections()?;
        if map.contains_key(&connection.name) {
            return Err(SyncError::DuplicateConnection(connection.name));
        }
        tracing::info!(name = %connection.name, address = %connection.address, "connection added");
        map.insert(connection.name.clone(), connection);
        self.write_with_fallback(CONNECTIONS_FILE, &map)?;
        Ok(())
    }

    /// Delete a connection. Returns `false` when no such connection exists.
    pub fn delete_connection(&self, name: &str) -> Result<bool> {
        let _guard = self.lock();
        let mut map = self.try_load_connections()?;
        if map.remove(name).is_none() {
            return Ok(false);
        }
        self.write_with_fallback(CONNECTIONS_FILE, &map)?;
        tracing::info!(name, "connection deleted");
        Ok(true)
    }

    /// Update one field of a stored connection.
    ///
    /// Returns `Ok(false)` when `name` is not found. A value of the wrong kind
    /// for the field is an [`SyncError::UnsupportedFieldType`].
    pub fn update_connection_field(
        &self,
        name: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<bool> {
        let field: ConnectionField = field.parse()?;
        let _guard = self.lock();
        let mut map = self.try_load_connections()?;
        let Some(conn) = map.get_mut(name) else {
            tracing::debug!(name, "field update for unknown connection");
            return Ok(false);
        };
        conn.apply_field(field, value)?;
        self.write_with_fallback(CONNECTIONS_FILE, &map)?;
        tracing::info!(name, ?field, "connection field updated");
        Ok(true)
    }

    /// `true` when no connection is stored (or the stored data is unreadable).
    pub fn is_config_empty(&self) -> bool {
        self.load_connections().is_empty()
    }

    // ── Filter list ───────────────────────────────────────────────────────────

    /// Load the filter list, defaulting to an empty allow-list.
    ///
    /// Malformed data is logged and replaced by the default.
    pub fn load_filter_list(&self) -> FilterList {
        self.try_load_filter_list().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load filter list; using defaults");
            FilterList::default()
        })
    }

    /// Load the filter list, surfacing malformed data as an error.
    pub fn try_load_filter_list(&self) -> Result<FilterList> {
        let Some(path) = self.locate(FILTER_FILE) else {
            return Ok(FilterList::default());
        };
        Ok(read_json::<FilterList>(&path)?.unwrap_or_default())
    }

    /// Persist the filter list. Returns the path that was written.
    pub fn save_filter_list(&self, filter: &FilterList) -> Result<PathBuf> {
        let _guard = self.lock();
        self.write_with_fallback(FILTER_FILE, filter)
    }

    /// Read, modify and write the filter list as one serialised step.
    pub fn update_filter_list(&self, edit: impl FnOnce(&mut FilterList)) -> Result<FilterList> {
        let _guard = self.lock();
        let mut filter = self.try_load_filter_list()?;
        edit(&mut filter);
        self.write_with_fallback(FILTER_FILE, &filter)?;
        Ok(filter)
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn candidates(&self, file: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.primary_dir.join(file)];
        if let Some(dir) = &self.fallback_dir {
            paths.push(dir.join(file));
        }
        paths
    }

    fn locate(&self, file: &str) -> Option<PathBuf> {
        newest_existing(&self.candidates(file))
    }

    /// Write to the primary location, then to the fallback on failure.
    /// Callers must hold the write lock.
    fn write_with_fallback<T: Serialize>(&self, file: &str, value: &T) -> Result<PathBuf> {
        let primary = self.primary_dir.join(file);
        let primary_err = match write_json_atomic(&primary, value) {
            Ok(()) => return Ok(primary),
            Err(e) => e,
        };

        let Some(dir) = &self.fallback_dir else {
            tracing::error!(error = %primary_err, "config write failed; no fallback location");
            return Err(primary_err);
        };

        tracing::warn!(
            error = %primary_err,
            fallback = %dir.display(),
            "primary config write failed; using fallback location"
        );
        let fallback = dir.join(file);
        match write_json_atomic(&fallback, value) {
            Ok(()) => Ok(fallback),
            Err(e) => {
                tracing::error!(error = %e, "fallback config write failed");
                Err(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::models::{CipherMode, Encryption};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().to_path_buf(), None)
    }

    fn encrypted(name: &str) -> Connection {
        Connection::bark(name, "https://bark.example/push").with_encryption(Encryption {
            cipher_mode: CipherMode::Aes128Cbc,
            key: "0123456789ABCDEF".to_string(),
            iv: Some("FEDCBA9876543210".to_string()),
        })
    }

    /// A store whose primary directory is a regular file, so writes fail.
    fn blocked_store(dir: &TempDir) -> ConfigStore {
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        ConfigStore::new(blocker, Some(dir.path().join("fallback")))
    }

    // ── connections ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_connections_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load_connections().is_empty());
        assert!(store(&dir).is_config_empty());
    }

    #[test]
    fn test_load_connections_malformed_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONNECTIONS_FILE), "[not, json").unwrap();
        let s = store(&dir);
        assert!(s.load_connections().is_empty());
        assert!(matches!(s.try_load_connections(), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_add_and_reload_connection() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(encrypted("home")).unwrap();

        let map = store(&dir).load_connections();
        assert_eq!(map.len(), 1);
        assert_eq!(map["home"], encrypted("home"));
        assert!(!s.is_config_empty());
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(Connection::bark("home", "https://a")).unwrap();
        let err = s
            .add_connection(Connection::bark("home", "https://b"))
            .unwrap_err();
        assert!(matches!(err, SyncError::DuplicateConnection(n) if n == "home"));
    }

    #[test]
    fn test_add_invalid_encryption_rejected() {
        let dir = TempDir::new().unwrap();
        let mut conn = encrypted("home");
        conn.encryption.as_mut().unwrap().key = "tooshort".to_string();
        assert!(store(&dir).add_connection(conn).is_err());
        assert!(store(&dir).is_config_empty());
    }

    #[test]
    fn test_add_does_not_overwrite_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONNECTIONS_FILE);
        std::fs::write(&path, "{corrupt").unwrap();
        assert!(store(&dir)
            .add_connection(Connection::bark("x", "https://x"))
            .is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{corrupt");
    }

    #[test]
    fn test_filter_edit_does_not_overwrite_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FILTER_FILE);
        let corrupt = r#"{"blackList": true, "pkgNames": ["com.a", "com.b", 7]}"#;
        std::fs::write(&path, corrupt).unwrap();

        let s = store(&dir);
        assert!(s.try_load_filter_list().is_err());
        assert_eq!(s.load_filter_list(), FilterList::default());
        assert!(s
            .update_filter_list(|f| {
                f.packages.insert("com.c".to_string());
            })
            .is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupt);
    }

    #[test]
    fn test_map_key_overrides_record_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONNECTIONS_FILE),
            r#"{"office": {"address": "https://o"}}"#,
        )
        .unwrap();
        let map = store(&dir).load_connections();
        assert_eq!(map["office"].name, "office");
        assert!(map["office"].enabled);
    }

    #[test]
    fn test_delete_connection() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(Connection::bark("a", "https://a")).unwrap();
        assert!(s.delete_connection("a").unwrap());
        assert!(!s.delete_connection("a").unwrap());
        assert!(s.is_config_empty());
    }

    #[test]
    fn test_update_field_unknown_name_returns_false() {
        let dir = TempDir::new().unwrap();
        assert!(!store(&dir)
            .update_connection_field("ghost", "enabled", false.into())
            .unwrap());
    }

    #[test]
    fn test_update_field_persists() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(Connection::bark("a", "https://a")).unwrap();
        assert!(s.update_connection_field("a", "enabled", false.into()).unwrap());
        assert!(s
            .update_connection_field("a", "timeoutSecs", 3i64.into())
            .unwrap());

        let conn = &store(&dir).load_connections()["a"];
        assert!(!conn.enabled);
        assert_eq!(conn.timeout_secs, 3);
    }

    #[test]
    fn test_update_field_wrong_type_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(Connection::bark("a", "https://a")).unwrap();
        let err = s
            .update_connection_field("a", "enabled", "nope".into())
            .unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedFieldType { .. }));
        // Nothing was written.
        assert!(s.load_connections()["a"].enabled);
    }

    #[test]
    fn test_update_unknown_field_is_error() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add_connection(Connection::bark("a", "https://a")).unwrap();
        assert!(matches!(
            s.update_connection_field("a", "colour", "red".into()),
            Err(SyncError::UnknownField(_))
        ));
    }

    #[test]
    fn test_save_connections_falls_back() {
        let dir = TempDir::new().unwrap();
        let s = blocked_store(&dir);
        let mut map = ConnectionMap::new();
        map.insert("a".to_string(), Connection::bark("a", "https://a"));

        let written = s.save_connections(&map).unwrap();
        assert_eq!(written, dir.path().join("fallback").join(CONNECTIONS_FILE));
        assert_eq!(s.load_connections().len(), 1);
    }

    #[test]
    fn test_save_without_fallback_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let s = ConfigStore::new(blocker, None);
        let err = s.save_connections(&ConnectionMap::new()).unwrap_err();
        assert!(matches!(err, SyncError::FileWrite { .. }));
    }

    // ── filter list ───────────────────────────────────────────────────────────

    #[test]
    fn test_filter_defaults_when_absent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load_filter_list(), FilterList::default());
    }

    #[test]
    fn test_filter_defaults_when_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(FILTER_FILE), "{\"blackList\": \"maybe\"}").unwrap();
        assert_eq!(store(&dir).load_filter_list(), FilterList::default());
    }

    #[test]
    fn test_filter_round_trip_and_file_shape() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save_filter_list(&FilterList::deny(["com.spam"])).unwrap();
        assert_eq!(s.load_filter_list(), FilterList::deny(["com.spam"]));

        let raw = std::fs::read_to_string(dir.path().join(FILTER_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["blackList"], true);
        assert_eq!(value["pkgNames"], serde_json::json!(["com.spam"]));
    }

    #[test]
    fn test_update_filter_list() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let updated = s
            .update_filter_list(|f| {
                f.packages.insert("com.chat".to_string());
            })
            .unwrap();
        assert!(updated.packages.contains("com.chat"));
        assert_eq!(s.load_filter_list(), updated);
    }

    #[test]
    fn test_filter_falls_back_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let s = blocked_store(&dir);
        s.save_filter_list(&FilterList::allow(["com.chat"])).unwrap();
        assert_eq!(s.load_filter_list(), FilterList::allow(["com.chat"]));
    }

    #[test]
    fn test_reads_newest_of_primary_and_fallback() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("primary");
        let fallback = dir.path().join("fallback");
        std::fs::create_dir_all(&primary).unwrap();
        std::fs::create_dir_all(&fallback).unwrap();

        let old = FilterList::allow(["old"]);
        let new = FilterList::allow(["new"]);
        write_json_atomic(&primary.join(FILTER_FILE), &old).unwrap();
        write_json_atomic(&fallback.join(FILTER_FILE), &new).unwrap();
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(120);
        std::fs::File::options()
            .write(true)
            .open(primary.join(FILTER_FILE))
            .unwrap()
            .set_modified(past)
            .unwrap();

        let s = ConfigStore::new(primary, Some(fallback));
        assert_eq!(s.load_filter_list(), new);
    }
}
