//! Local filesystem storage
//!
//! Directories are created `rwxr-x---` and files `rw-r-----`. Files are written
//! under a `.dumping` name and renamed into place on finish.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{dumping_name, ObjectInfo, ReadStream, Storage, WriteStream, DUMPING_SUFFIX};

const READ_BLOCK: usize = 256 * 1024;

#[cfg(unix)]
const DIR_MODE: u32 = 0o750;
#[cfg(unix)]
const FILE_MODE: u32 = 0o640;

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the root directory (and parents) if missing
    pub async fn create_root(&self) -> Result<()> {
        create_dir(&self.root).await
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder
        .create(path)
        .await
        .map_err(|e| Error::io(path.display().to_string(), e))
}

async fn create_file(path: &Path) -> Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options
        .open(path)
        .await
        .map_err(|e| Error::io(path.display().to_string(), e))
}

#[async_trait]
impl Storage for LocalStorage {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn open_read(&self, name: &str) -> Result<Box<dyn ReadStream>> {
        let path = self.path_of(name);
        let file = File::open(&path)
            .await
            .map_err(|e| Error::io(name, e))?;
        Ok(Box::new(LocalReader {
            file,
            name: name.to_string(),
        }))
    }

    async fn open_write(&self, name: &str) -> Result<Box<dyn WriteStream>> {
        let target = self.path_of(name);
        if let Some(parent) = target.parent() {
            create_dir(parent).await?;
        }
        let temp = self.path_of(&dumping_name(name));
        let file = create_file(&temp).await?;
        debug!("Writing {}", temp.display());
        Ok(Box::new(LocalWriter {
            writer: BufWriter::with_capacity(READ_BLOCK, file),
            temp,
            target,
            written: 0,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(self.describe(), e)),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(self.describe(), e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) || name.ends_with(DUMPING_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().await.map_err(|e| Error::io(&name, e))?;
            if meta.is_file() {
                objects.push(ObjectInfo::new(name, meta.len()));
            }
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(name, e)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.path_of(from), self.path_of(to))
            .await
            .map_err(|e| Error::io(from, e))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        fs::try_exists(self.path_of(name))
            .await
            .map_err(|e| Error::io(name, e))
    }

    fn is_local(&self) -> bool {
        true
    }

    fn local_root(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

struct LocalReader {
    file: File,
    name: String,
}

#[async_trait]
impl ReadStream for LocalReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_BLOCK);
        let n = self
            .file
            .read_buf(&mut buf)
            .await
            .map_err(|e| Error::io(&self.name, e))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

struct LocalWriter {
    writer: BufWriter<File>,
    temp: PathBuf,
    target: PathBuf,
    written: u64,
}

#[async_trait]
impl WriteStream for LocalWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| Error::io(self.temp.display().to_string(), e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let mut this = *self;
        let temp_name = this.temp.display().to_string();
        this.writer
            .flush()
            .await
            .map_err(|e| Error::io(&temp_name, e))?;
        this.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| Error::io(&temp_name, e))?;
        drop(this.writer);
        fs::rename(&this.temp, &this.target)
            .await
            .map_err(|e| Error::io(&temp_name, e))?;
        Ok(this.written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let this = *self;
        drop(this.writer);
        match fs::remove_file(&this.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(this.temp.display().to_string(), e)),
        }
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_is_invisible_until_finish() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().join("dump"));

        let mut writer = storage.open_write("s.t@0.tsv").await.unwrap();
        writer.write(b"1\ta\n").await.unwrap();
        assert!(!storage.exists("s.t@0.tsv").await.unwrap());
        assert!(storage.list("s.").await.unwrap().is_empty());

        assert_eq!(writer.finish().await.unwrap(), 4);
        assert!(storage.exists("s.t@0.tsv").await.unwrap());
        assert!(!storage.exists("s.t@0.tsv.dumping").await.unwrap());
        assert_eq!(
            storage.list("s.").await.unwrap(),
            vec![ObjectInfo::new("s.t@0.tsv", 4)]
        );
        assert_eq!(&storage.read_all("s.t@0.tsv").await.unwrap()[..], b"1\ta\n");
    }

    #[tokio::test]
    async fn test_abort_removes_temporary() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let mut writer = storage.open_write("x.sql").await.unwrap();
        writer.write(b"CREATE").await.unwrap();
        writer.abort().await.unwrap();
        assert!(!dir.path().join("x.sql.dumping").exists());
        assert!(!dir.path().join("x.sql").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let root = dir.path().join("out");
        let storage = LocalStorage::new(&root);
        storage.write_all("@.json", b"{}").await.unwrap();

        let dir_mode = std::fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        let file_mode = std::fs::metadata(root.join("@.json"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        // the process umask can only remove bits
        assert_eq!(dir_mode & !0o750, 0);
        assert_eq!(file_mode & !0o640, 0);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.read_all("nope").await.unwrap_err().is_not_found());
        storage.remove("nope").await.unwrap();
        assert!(storage.list("").await.unwrap().is_empty());
    }
}
