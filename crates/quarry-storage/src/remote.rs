//! Object-store backed storage
//!
//! Provides one implementation for every remote backend using the
//! `object_store` crate:
//!
//! - Amazon S3 and S3-compatible services (`s3` feature)
//! - OCI Object Storage through its S3-compatible endpoint (`s3` feature)
//! - Azure Blob Storage (`azure` feature)
//! - OCI prefix pre-authenticated requests over plain HTTPS (`par` feature)
//!
//! Large objects are uploaded with multipart uploads whose part size grows with
//! the part index, so the 10,000-part limit of the services still admits
//! objects above 1.2 TiB. Objects are written under a `.dumping` name and
//! renamed on finish, except for PARs which cannot rename and are written in
//! place.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::location::Location;
#[cfg(feature = "par")]
use crate::location::ParUrl;
#[cfg(any(feature = "s3", feature = "azure"))]
use crate::location::StorageOptions;
use crate::retry::RetryPolicy;
use crate::storage::{dumping_name, ObjectInfo, ReadStream, Storage, WriteStream, DUMPING_SUFFIX};

// ============================================================================
// Part sizing
// ============================================================================

/// Size of the first 1000 parts
pub const MIN_PART_SIZE: usize = 10 * 1024 * 1024;

/// Largest part accepted by the services
pub const MAX_PART_SIZE: usize = 5 * 1024 * 1024 * 1024;

/// Part limit of a multipart upload
pub const MAX_PARTS: usize = 10_000;

/// Size of part number `part_index` (0-based); doubles every 1000 parts
pub fn part_size(part_index: usize) -> usize {
    let tier = (part_index / 1000).min(16) as u32;
    MIN_PART_SIZE.saturating_mul(1usize << tier).min(MAX_PART_SIZE)
}

/// Largest object that fits into [`MAX_PARTS`] parts
pub fn max_object_size() -> u64 {
    (0..MAX_PARTS).map(|i| part_size(i) as u64).sum()
}

// ============================================================================
// Storage
// ============================================================================

/// How objects of this store are addressed by the server for bulk loading
#[derive(Debug, Clone)]
enum ServerUrl {
    None,
    S3 { region: String, bucket: String },
    Https { base: String },
}

/// Storage over any `object_store` backend
pub struct RemoteStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    description: String,
    retry: RetryPolicy,
    atomic_rename: bool,
    multipart: bool,
    server_url: ServerUrl,
    #[cfg(feature = "par")]
    par: Option<ParUrl>,
}

impl std::fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("description", &self.description)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RemoteStorage {
    /// Wrap an existing store
    pub fn from_store(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            store,
            prefix,
            description: description.into(),
            retry: RetryPolicy::default(),
            atomic_rename: true,
            multipart: true,
            server_url: ServerUrl::None,
            #[cfg(feature = "par")]
            par: None,
        }
    }

    /// Use a different retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Amazon S3 or an S3-compatible service
    #[cfg(feature = "s3")]
    pub fn s3(bucket: &str, prefix: &str, options: &StorageOptions) -> Result<Self> {
        use crate::credentials::resolve_aws;
        use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};

        let retry = RetryPolicy::default();
        let aws = resolve_aws(options, |key| std::env::var(key).ok())?;
        debug!(
            "Using AWS profile '{}' in region {} ({:?})",
            aws.profile, aws.region, aws.source
        );

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&aws.region)
            .with_retry(retry.to_object_store());

        if let Some(endpoint) = &options.s3_endpoint_override {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        if let Some(keys) = &aws.keys {
            builder = builder
                .with_access_key_id(&keys.access_key_id)
                .with_secret_access_key(&keys.secret_access_key);
            if let Some(token) = &keys.session_token {
                builder = builder.with_token(token);
            }
        } else if let Some(container) = &aws.container {
            match (&container.relative_uri, &container.full_uri) {
                (Some(relative), _) => {
                    builder = builder
                        .with_config(AmazonS3ConfigKey::ContainerCredentialsRelativeUri, relative);
                }
                (None, Some(_)) => {
                    return Err(Error::config(
                        "AWS_CONTAINER_CREDENTIALS_FULL_URI is not supported, use AWS_CONTAINER_CREDENTIALS_RELATIVE_URI or static credentials",
                    ));
                }
                (None, None) => {}
            }
        } else if let Some(endpoint) = &aws.metadata_endpoint {
            builder = builder.with_metadata_endpoint(endpoint);
        }

        let store = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create S3 client: {}", e)))?;

        let mut storage = Self::from_store(
            Arc::new(store),
            prefix,
            Location::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            }
            .to_string(),
        );
        storage.retry = retry;
        storage.server_url = ServerUrl::S3 {
            region: aws.region,
            bucket: bucket.to_string(),
        };
        Ok(storage)
    }

    /// OCI Object Storage through the S3-compatible endpoint
    #[cfg(feature = "s3")]
    pub fn oci(bucket: &str, prefix: &str, options: &StorageOptions) -> Result<Self> {
        let namespace = options
            .os_namespace
            .as_deref()
            .ok_or_else(|| Error::config("The osNamespace option is required for oci:// locations"))?;
        let region = options
            .oci_region
            .clone()
            .or_else(|| options.s3_region.clone())
            .ok_or_else(|| Error::config("The ociRegion option is required for oci:// locations"))?;

        let s3_options = StorageOptions {
            s3_region: Some(region.clone()),
            s3_endpoint_override: Some(format!(
                "https://{}.compat.objectstorage.{}.oraclecloud.com",
                namespace, region
            )),
            ..options.clone()
        };
        let mut storage = Self::s3(bucket, prefix, &s3_options)?;
        storage.description = Location::Oci {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
        .to_string();
        storage.server_url = ServerUrl::Https {
            base: format!(
                "https://objectstorage.{}.oraclecloud.com/n/{}/b/{}/o/",
                region, namespace, bucket
            ),
        };
        Ok(storage)
    }

    /// Azure Blob Storage
    #[cfg(feature = "azure")]
    pub fn azure(container: &str, prefix: &str, options: &StorageOptions) -> Result<Self> {
        use crate::credentials::resolve_azure;
        use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};

        let retry = RetryPolicy::default();
        let azure = resolve_azure(options, |key| std::env::var(key).ok())?;

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&azure.account)
            .with_container_name(container)
            .with_retry(retry.to_object_store());
        if let Some(key) = &azure.access_key {
            builder = builder.with_access_key(key);
        }
        if let Some(sas) = &azure.sas_token {
            builder = builder.with_config(AzureConfigKey::SasKey, sas.trim_start_matches('?'));
        }
        if let Some(endpoint) = &azure.endpoint {
            builder = builder.with_config(AzureConfigKey::Endpoint, endpoint);
        }

        let store = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create Azure Blob client: {}", e)))?;

        let mut storage = Self::from_store(
            Arc::new(store),
            prefix,
            Location::Azure {
                container: container.to_string(),
                prefix: prefix.to_string(),
            }
            .to_string(),
        );
        storage.retry = retry;
        Ok(storage)
    }

    /// OCI prefix pre-authenticated request
    #[cfg(feature = "par")]
    pub fn par(par: ParUrl) -> Result<Self> {
        use object_store::http::HttpBuilder;

        let retry = RetryPolicy::default();
        let store = HttpBuilder::new()
            .with_url(par.base.clone())
            .with_retry(retry.to_object_store())
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        let mut storage = Self::from_store(
            Arc::new(store),
            par.object.clone(),
            Location::Par(par.clone()).to_string(),
        );
        storage.retry = retry;
        storage.atomic_rename = false;
        storage.multipart = false;
        storage.server_url = ServerUrl::Https {
            base: par.base.clone(),
        };
        storage.par = Some(par);
        Ok(storage)
    }

    fn path_of(&self, name: &str) -> ObjectPath {
        ObjectPath::from(format!("{}{}", self.prefix, name))
    }

    fn relative_name<'a>(&self, location: &'a str) -> &'a str {
        location.strip_prefix(&self.prefix).unwrap_or(location)
    }

    #[cfg(feature = "par")]
    async fn list_par(&self, par: &ParUrl, prefix: &str) -> Result<Vec<ObjectInfo>> {
        use object_store::http::HttpBuilder;

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Listing {
            #[serde(default)]
            objects: Vec<Entry>,
            next_start_with: Option<String>,
        }

        #[derive(serde::Deserialize)]
        struct Entry {
            name: String,
            #[serde(default)]
            size: u64,
        }

        let full_prefix = format!("{}{}", self.prefix, prefix);
        let mut objects = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let mut url = url::Url::parse(&par.base)
                .map_err(|e| Error::config(format!("Invalid PAR URL: {}", e)))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("fields", "name,size");
                query.append_pair("prefix", &full_prefix);
                if let Some(start) = &start {
                    query.append_pair("start", start);
                }
            }
            let page = HttpBuilder::new()
                .with_url(url.to_string())
                .with_retry(self.retry.to_object_store())
                .build()
                .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

            let body = self
                .retry
                .run("list", || async {
                    page.get(&ObjectPath::default())
                        .await
                        .map_err(|e| Error::from_object_store(&self.description, e))?
                        .bytes()
                        .await
                        .map_err(|e| Error::from_object_store(&self.description, e))
                })
                .await?;

            let listing: Listing = serde_json::from_slice(&body).map_err(|e| Error::Permanent {
                name: self.description.clone(),
                message: format!("Invalid listing response: {}", e),
            })?;
            for entry in listing.objects {
                let relative = self.relative_name(&entry.name).to_string();
                if relative.starts_with(prefix) && !relative.ends_with(DUMPING_SUFFIX) {
                    objects.push(ObjectInfo::new(relative, entry.size));
                }
            }
            match listing.next_start_with {
                Some(next) if !next.is_empty() => start = Some(next),
                _ => break,
            }
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn open_read(&self, name: &str) -> Result<Box<dyn ReadStream>> {
        let path = self.path_of(name);
        let result = self
            .retry
            .run("get", || async {
                self.store
                    .get(&path)
                    .await
                    .map_err(|e| Error::from_object_store(name, e))
            })
            .await?;
        Ok(Box::new(RemoteReader {
            stream: result.into_stream(),
            name: name.to_string(),
        }))
    }

    async fn open_write(&self, name: &str) -> Result<Box<dyn WriteStream>> {
        let upload_name = if self.atomic_rename {
            dumping_name(name)
        } else {
            name.to_string()
        };
        Ok(Box::new(RemoteWriter {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
            name: name.to_string(),
            upload_path: self.path_of(&upload_name),
            final_path: self.atomic_rename.then(|| self.path_of(name)),
            multipart: self.multipart,
            buffer: Vec::new(),
            upload: None,
            part_index: 0,
            written: 0,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        #[cfg(feature = "par")]
        if let Some(par) = &self.par {
            return self.list_par(par, prefix).await;
        }

        let root = (!self.prefix.is_empty()).then(|| ObjectPath::from(self.prefix.as_str()));
        self.retry
            .run("list", || async {
                let mut stream = self.store.list(root.as_ref());
                let mut objects = Vec::new();
                while let Some(meta) = stream.next().await {
                    let meta = meta.map_err(|e| Error::from_object_store(&self.description, e))?;
                    let location = meta.location.to_string();
                    let relative = self.relative_name(&location);
                    if relative.starts_with(prefix) && !relative.ends_with(DUMPING_SUFFIX) {
                        objects.push(ObjectInfo::new(relative, meta.size as u64));
                    }
                }
                objects.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(objects)
            })
            .await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        self.retry
            .run("delete", || async {
                match self.store.delete(&path).await {
                    Ok(()) => Ok(()),
                    Err(object_store::Error::NotFound { .. }) => Ok(()),
                    Err(e) => Err(Error::from_object_store(name, e)),
                }
            })
            .await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (src, dst) = (self.path_of(from), self.path_of(to));
        self.retry
            .run("rename", || async {
                self.store
                    .rename(&src, &dst)
                    .await
                    .map_err(|e| Error::from_object_store(from, e))
            })
            .await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_of(name);
        self.retry
            .run("head", || async {
                match self.store.head(&path).await {
                    Ok(_) => Ok(true),
                    Err(object_store::Error::NotFound { .. }) => Ok(false),
                    Err(e) => Err(Error::from_object_store(name, e)),
                }
            })
            .await
    }

    fn object_url(&self, name: &str) -> Option<String> {
        let key = format!("{}{}", self.prefix, name);
        match &self.server_url {
            ServerUrl::None => None,
            ServerUrl::S3 { region, bucket } => Some(format!("s3-{}://{}/{}", region, bucket, key)),
            ServerUrl::Https { base } => Some(format!("{}{}", base, key)),
        }
    }
}

// ============================================================================
// Streams
// ============================================================================

struct RemoteReader {
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    name: String,
}

#[async_trait]
impl ReadStream for RemoteReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(Error::from_object_store(&self.name, e)),
            None => Ok(None),
        }
    }
}

struct RemoteWriter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    name: String,
    upload_path: ObjectPath,
    final_path: Option<ObjectPath>,
    multipart: bool,
    buffer: Vec<u8>,
    upload: Option<Box<dyn MultipartUpload>>,
    part_index: usize,
    written: u64,
}

impl RemoteWriter {
    async fn upload_part(&mut self, part: Vec<u8>) -> Result<()> {
        if self.part_index >= MAX_PARTS {
            return Err(Error::Permanent {
                name: self.name.clone(),
                message: format!("object exceeds the limit of {} parts", MAX_PARTS),
            });
        }
        if self.upload.is_none() {
            let upload = self
                .store
                .put_multipart(&self.upload_path)
                .await
                .map_err(|e| Error::from_object_store(&self.name, e))?;
            self.upload = Some(upload);
        }
        if let Some(upload) = self.upload.as_mut() {
            upload
                .put_part(PutPayload::from(part))
                .await
                .map_err(|e| Error::from_object_store(&self.name, e))?;
        }
        self.part_index += 1;
        Ok(())
    }
}

#[async_trait]
impl WriteStream for RemoteWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        self.written += data.len() as u64;
        while self.multipart && self.buffer.len() >= part_size(self.part_index) {
            let rest = self.buffer.split_off(part_size(self.part_index));
            let part = std::mem::replace(&mut self.buffer, rest);
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let mut this = *self;
        let tail = std::mem::take(&mut this.buffer);

        if this.upload.is_some() {
            if !tail.is_empty() {
                this.upload_part(tail).await?;
            }
            if let Some(mut upload) = this.upload.take() {
                upload
                    .complete()
                    .await
                    .map_err(|e| Error::from_object_store(&this.name, e))?;
            }
        } else {
            let payload = PutPayload::from(Bytes::from(tail));
            let (store, path, name) = (&this.store, &this.upload_path, &this.name);
            this.retry
                .run("put", || {
                    let payload = payload.clone();
                    async move {
                        store
                            .put(path, payload)
                            .await
                            .map(|_| ())
                            .map_err(|e| Error::from_object_store(name, e))
                    }
                })
                .await?;
        }

        if let Some(final_path) = &this.final_path {
            let (store, from, name) = (&this.store, &this.upload_path, &this.name);
            this.retry
                .run("rename", || async move {
                    store
                        .rename(from, final_path)
                        .await
                        .map_err(|e| Error::from_object_store(name, e))
                })
                .await?;
        }
        debug!("Uploaded {} ({} bytes, {} parts)", this.name, this.written, this.part_index);
        Ok(this.written)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        if let Some(mut upload) = this.upload.take() {
            if let Err(e) = upload.abort().await {
                warn!("Failed to abort upload of {}: {}", this.name, e);
            }
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn storage() -> RemoteStorage {
        RemoteStorage::from_store(Arc::new(InMemory::new()), "dumps/world", "mem://dumps/world")
            .with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_part_schedule_reaches_object_ceiling() {
        assert_eq!(part_size(0), MIN_PART_SIZE);
        assert_eq!(part_size(999), MIN_PART_SIZE);
        assert_eq!(part_size(1000), 2 * MIN_PART_SIZE);
        assert_eq!(part_size(9999), 512 * MIN_PART_SIZE);
        let ceiling = 12 * (1u64 << 40) / 10;
        assert!(max_object_size() > ceiling);
    }

    #[tokio::test]
    async fn test_rename_on_finish() {
        let storage = storage();
        let mut writer = storage.open_write("@.json").await.unwrap();
        writer.write(b"{\"version\":\"2.0.1\"}").await.unwrap();
        assert!(!storage.exists("@.json").await.unwrap());
        writer.finish().await.unwrap();

        assert!(storage.exists("@.json").await.unwrap());
        assert!(!storage.exists("@.json.dumping").await.unwrap());
        assert_eq!(
            storage.list("@.").await.unwrap(),
            vec![ObjectInfo::new("@.json", 19)]
        );
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let storage = storage();
        let block = vec![b'x'; 1024 * 1024];
        let mut writer = storage.open_write("s.t@0.tsv").await.unwrap();
        for _ in 0..25 {
            writer.write(&block).await.unwrap();
        }
        assert_eq!(writer.finish().await.unwrap(), 25 * 1024 * 1024);
        let data = storage.read_all("s.t@0.tsv").await.unwrap();
        assert_eq!(data.len(), 25 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let storage = storage();
        storage.remove("nothing").await.unwrap();
        assert!(storage.read_all("nothing").await.unwrap_err().is_not_found());
    }
}
