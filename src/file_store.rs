use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::FileStoreKind;
use crate::error::{Error, Result};

/// Cloud-side folders and files holding the result CSVs. Ids are opaque to
/// callers; every folder hangs off `root_folder()`.
#[async_trait]
pub trait FileStore: Send + Sync {
    fn root_folder(&self) -> &str;

    async fn find_folder_by_name(&self, name: &str, parent: &str) -> Result<Option<String>>;

    async fn create_folder(&self, name: &str, parent: &str) -> Result<String>;

    /// Upload a local file into `folder_id`, keeping its file name.
    async fn upload_file(&self, path: &Path, folder_id: &str) -> Result<String>;

    /// Overwrite the content of an existing file.
    async fn update_file(&self, file_id: &str, path: &Path) -> Result<()>;

    async fn read_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

pub async fn find_or_create_folder(store: &dyn FileStore, name: &str, parent: &str) -> Result<String> {
    if let Some(id) = store.find_folder_by_name(name, parent).await? {
        debug!(name, id = %id, "Folder already exists");
        return Ok(id);
    }
    let id = store.create_folder(name, parent).await?;
    info!(name, id = %id, "Created folder");
    Ok(id)
}

pub fn from_config(kind: &FileStoreKind) -> Box<dyn FileStore> {
    match kind {
        FileStoreKind::Local { root } => Box::new(LocalFileStore::new(root.clone())),
        FileStoreKind::Drive {
            parent_folder_id,
            token,
        } => Box::new(DriveFileStore::new(parent_folder_id.clone(), token.clone())),
    }
}

// ── Local directory ──

/// A directory tree standing in for the drive. Ids are paths relative to
/// the root, '/'-separated; the root itself is the empty id.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let rel = Path::new(id);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::FileStore(format!("invalid local id '{}'", id)));
        }
        Ok(self.root.join(rel))
    }
}

fn child_id(parent: &str, name: &str) -> String {
    let name = name.replace('/', "-");
    if parent.is_empty() {
        name
    } else {
        format!("{}/{}", parent, name)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn root_folder(&self) -> &str {
        ""
    }

    async fn find_folder_by_name(&self, name: &str, parent: &str) -> Result<Option<String>> {
        let id = child_id(parent, name);
        let exists = tokio::fs::metadata(self.resolve(&id)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        Ok(exists.then_some(id))
    }

    async fn create_folder(&self, name: &str, parent: &str) -> Result<String> {
        let id = child_id(parent, name);
        tokio::fs::create_dir_all(self.resolve(&id)?).await?;
        Ok(id)
    }

    async fn upload_file(&self, path: &Path, folder_id: &str) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::FileStore(format!("{} has no file name", path.display())))?;
        let id = child_id(folder_id, file_name);
        let target = self.resolve(&id)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::copy(path, &target).await?;
        Ok(id)
    }

    async fn update_file(&self, file_id: &str, path: &Path) -> Result<()> {
        let target = self.resolve(file_id)?;
        if !tokio::fs::try_exists(&target).await? {
            return Err(Error::FileStore(format!("file '{}' does not exist", file_id)));
        }
        tokio::fs::copy(path, &target).await?;
        Ok(())
    }

    async fn read_file(&self, file_id: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(file_id)?).await?)
    }
}

// ── Google Drive ──

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Drive v3 over REST. Obtaining the bearer token is the caller's job.
pub struct DriveFileStore {
    client: reqwest::Client,
    parent_folder_id: String,
    token: String,
}

impl DriveFileStore {
    pub fn new(parent_folder_id: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            parent_folder_id,
            token,
        }
    }

    async fn upload_content(&self, file_id: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        self.client
            .patch(format!("{}/{}", DRIVE_UPLOAD_API, file_id))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl FileStore for DriveFileStore {
    fn root_folder(&self) -> &str {
        &self.parent_folder_id
    }

    async fn find_folder_by_name(&self, name: &str, parent: &str) -> Result<Option<String>> {
        let q = format!(
            "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            FOLDER_MIME,
            escape_query(parent)
        );
        let list: DriveFileList = self
            .client
            .get(DRIVE_API)
            .bearer_auth(&self.token)
            .query(&[("q", q.as_str()), ("fields", "files(id, name)")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent: &str) -> Result<String> {
        let file: DriveFile = self
            .client
            .post(DRIVE_API)
            .bearer_auth(&self.token)
            .query(&[("fields", "id")])
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent],
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(file.id)
    }

    async fn upload_file(&self, path: &Path, folder_id: &str) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::FileStore(format!("{} has no file name", path.display())))?;
        let file: DriveFile = self
            .client
            .post(DRIVE_API)
            .bearer_auth(&self.token)
            .query(&[("fields", "id")])
            .json(&serde_json::json!({
                "name": name,
                "mimeType": "text/csv",
                "parents": [folder_id],
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.upload_content(&file.id, path).await?;
        Ok(file.id)
    }

    async fn update_file(&self, file_id: &str, path: &Path) -> Result<()> {
        self.upload_content(file_id, path).await
    }

    async fn read_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(format!("{}/{}", DRIVE_API, file_id))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn folders_are_found_after_creation() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());

        assert_eq!(store.find_folder_by_name("GGSIPU", "").await.unwrap(), None);
        let uni = find_or_create_folder(&store, "GGSIPU", store.root_folder()).await.unwrap();
        let again = find_or_create_folder(&store, "GGSIPU", "").await.unwrap();
        assert_eq!(uni, again);

        let degree = store.create_folder("027 - B.Tech/CSE", &uni).await.unwrap();
        assert_eq!(degree, "GGSIPU/027 - B.Tech-CSE");
        assert!(dir.path().join("GGSIPU/027 - B.Tech-CSE").is_dir());
    }

    #[tokio::test]
    async fn upload_read_update() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().join("remote"));
        let folder = store.create_folder("2021", "").await.unwrap();

        let staged = dir.path().join("03.csv");
        std::fs::write(&staged, "roll_num\n1\n").unwrap();
        let id = store.upload_file(&staged, &folder).await.unwrap();
        assert_eq!(id, "2021/03.csv");
        assert_eq!(store.read_file(&id).await.unwrap(), b"roll_num\n1\n");

        std::fs::write(&staged, "roll_num\n1\n2\n").unwrap();
        store.update_file(&id, &staged).await.unwrap();
        assert_eq!(store.read_file(&id).await.unwrap(), b"roll_num\n1\n2\n");
    }

    #[tokio::test]
    async fn update_of_unknown_file_fails() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        let staged = dir.path().join("01.csv");
        std::fs::write(&staged, "x").unwrap();
        assert!(matches!(
            store.update_file("missing.csv", &staged).await,
            Err(Error::FileStore(_))
        ));
    }

    #[test]
    fn rejects_escaping_ids() {
        let store = LocalFileStore::new(PathBuf::from("/tmp/store"));
        assert!(store.resolve("../etc").is_err());
        assert!(store.resolve("a/b.csv").is_ok());
    }

    #[test]
    fn drive_query_escaping() {
        assert_eq!(escape_query("VIDYAPEETH'S"), "VIDYAPEETH\\'S");
    }
}
