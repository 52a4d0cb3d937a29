//! A credential store backed by a local JSON file

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, sync::Mutex};

use super::{CredentialStore, StoreError};

/// A credential store that keeps a JSON object of string values in a local file
///
/// A missing file reads as an empty store. Number, boolean and `null` values
/// are read as strings, and a nested object or array reads as if its key were
/// absent. A file that is not a JSON object at all reads as empty and is
/// overwritten by the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Constructs a new file store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_values(&self) -> Result<BTreeMap<String, String>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;

        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&data) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = (&error as &dyn std::error::Error),
                    "credential file is not a JSON object, treating as empty"
                );
                return Ok(BTreeMap::new());
            }
        };

        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| match scalar_to_string(value) {
                Some(value) => Some((key, value)),
                None => {
                    tracing::warn!(
                        path = %self.path.display(),
                        key = %key,
                        "credential file value is not a scalar, ignoring it"
                    );
                    None
                }
            })
            .collect())
    }

    /// Replaces the file's contents by writing a sibling file and renaming it
    /// over the original
    async fn write_values(&self, values: &BTreeMap<String, String>) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&tmp_path).await?;
        let data = serde_json::to_string_pretty(values)?;
        file.write_all(data.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await
    }
}

/// Converts a JSON scalar to the string a store hands out
///
/// Environments written by other tools may hold numbers or booleans, such as
/// a numeric `expires_in`. Nested objects and arrays have no string form.
fn scalar_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_values().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_many(&[(key, value)]).await
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read_values().await?.contains_key(key))
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut values = self.read_values().await?;
        for (key, value) in entries {
            values.insert((*key).to_owned(), (*value).to_owned());
        }
        self.write_values(&values).await?;

        tracing::trace!(path = %self.path.display(), fields = entries.len(), "wrote credential file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tollgate_clock::{DurationMillis, UnixMillis};

    use super::*;
    use crate::{record::CredentialRecord, AccessToken, RefreshToken};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tollgate-file-store-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = scratch_dir("missing");
        let store = FileStore::new(dir.join("env.json"));

        assert_eq!(store.get("access_token").await.unwrap(), None);
        assert!(!store.has("access_token").await.unwrap());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty_and_is_replaced_on_write() {
        let dir = scratch_dir("corrupt");
        let path = dir.join("env.json");
        std::fs::write(&path, "{ this is not json").unwrap();
        let store = FileStore::new(&path);

        let record = CredentialRecord::load(&store).await.unwrap();
        assert_eq!(record, CredentialRecord::empty());

        let written: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.get("expires_in").map(String::as_str), Some("0"));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn numeric_values_are_read_as_strings_and_neighbours_survive() {
        let dir = scratch_dir("numeric");
        let path = dir.join("env.json");
        std::fs::write(
            &path,
            r#"{"client_id":"app","password":"pw","access_token":"a1","expires_in":3600000}"#,
        )
        .unwrap();
        let store = FileStore::new(&path);

        let record = CredentialRecord::load(&store).await.unwrap();
        assert_eq!(record.expires_in(), DurationMillis(3_600_000));
        assert_eq!(record.access_token().map(|t| t.as_str()), Some("a1"));

        let written: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.get("client_id").map(String::as_str), Some("app"));
        assert_eq!(written.get("password").map(String::as_str), Some("pw"));
        assert_eq!(written.get("expires_in").map(String::as_str), Some("3600000"));
        assert!(written.contains_key("refresh_time"));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn nested_value_only_normalizes_its_own_field() {
        let dir = scratch_dir("nested");
        let path = dir.join("env.json");
        std::fs::write(
            &path,
            r#"{"client_id":"app","refresh_token":{"oops":true},"expires_in":null}"#,
        )
        .unwrap();
        let store = FileStore::new(&path);

        let record = CredentialRecord::load(&store).await.unwrap();
        assert_eq!(record, CredentialRecord::empty());

        assert_eq!(store.get("client_id").await.unwrap().as_deref(), Some("app"));
        assert_eq!(store.get("refresh_token").await.unwrap().as_deref(), Some(""));
        assert_eq!(store.get("expires_in").await.unwrap().as_deref(), Some(""));

        cleanup(&dir);
    }

    #[tokio::test]
    async fn writes_leave_no_scratch_file_behind() {
        let dir = scratch_dir("scratch");
        let path = dir.join("env.json");

        FileStore::new(&path).set("k", "v").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, [std::ffi::OsString::from("env.json")]);

        cleanup(&dir);
    }

    #[tokio::test]
    async fn records_round_trip_through_the_file() {
        let dir = scratch_dir("round-trip");
        let path = dir.join("env.json");
        let record = CredentialRecord::issued(
            AccessToken::from_static("a1"),
            Some(RefreshToken::from_static("r1")),
            DurationMillis(3_600_000),
            UnixMillis(1_700_000_000_123),
        );

        record.persist(&FileStore::new(&path)).await.unwrap();
        let reloaded = CredentialRecord::load(&FileStore::new(&path)).await.unwrap();

        assert_eq!(reloaded, record);

        cleanup(&dir);
    }

    #[tokio::test]
    async fn writes_preserve_unrelated_keys() {
        let dir = scratch_dir("unrelated");
        let path = dir.join("env.json");
        std::fs::write(&path, r#"{"client_id":"app"}"#).unwrap();
        let store = FileStore::new(&path);

        store.set("access_token", "a1").await.unwrap();

        assert_eq!(store.get("client_id").await.unwrap().as_deref(), Some("app"));
        assert_eq!(store.get("access_token").await.unwrap().as_deref(), Some("a1"));

        cleanup(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_files_are_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = scratch_dir("mode");
        let path = dir.join("env.json");

        FileStore::new(&path).set("k", "v").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        cleanup(&dir);
    }
}
