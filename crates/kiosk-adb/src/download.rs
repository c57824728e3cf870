//! Package downloads into the host-side downloads directory.

use std::{
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use futures_util::StreamExt;
use kiosk_core::{DownloadProgress, DownloadResult, DownloadedFile, ProviderEmitters, ProviderError};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

const TMP_MARKER: &str = ".part-";

pub(crate) fn is_remote_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

pub(crate) fn local_source_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if url.starts_with('/') {
        Some(PathBuf::from(url))
    } else {
        None
    }
}

/// File name for a download: the caller's choice, else the last URL path
/// segment without its query string.
pub(crate) fn target_file_name(url: &str, requested: Option<&str>) -> Result<String, ProviderError> {
    let name = match requested {
        Some(name) => name.trim().to_string(),
        None => {
            let name = url.rsplit('/').next().unwrap_or_default();
            let name = name.split(['?', '#']).next().unwrap_or(name);
            if name.is_empty() {
                "package.apk".to_string()
            } else {
                name.to_string()
            }
        }
    };
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(ProviderError::rejected(
            "invalid_name",
            format!("unusable file name: {name:?}"),
        ));
    }
    Ok(name)
}

pub(crate) struct Downloads {
    dir: PathBuf,
    client: Client,
}

impl Downloads {
    pub(crate) fn new(dir: PathBuf) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("kiosk-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::rejected("http", format!("failed to build http client: {e}")))?;
        Ok(Self { dir, client })
    }

    pub(crate) async fn fetch(
        &self,
        url: &str,
        file_name: Option<&str>,
        emit: &ProviderEmitters,
    ) -> Result<DownloadResult, ProviderError> {
        let url = url.trim();
        let name = target_file_name(url, file_name)?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            ProviderError::rejected("io", format!("failed to create download dir: {e}"))
        })?;
        let dest = self.dir.join(&name);

        let size = if is_remote_url(url) {
            info!("Downloading package {url}");
            self.fetch_remote(url, &dest, emit).await?
        } else if let Some(source) = local_source_path(url) {
            copy_local(&source, &dest, emit).await?
        } else {
            return Err(ProviderError::rejected(
                "invalid_url",
                format!("unsupported url: {url}"),
            ));
        };

        info!("Saved package {}", dest.display());
        Ok(DownloadResult {
            file_name: name,
            file_path: dest.display().to_string(),
            file_size: size,
        })
    }

    async fn fetch_remote(
        &self,
        url: &str,
        dest: &Path,
        emit: &ProviderEmitters,
    ) -> Result<u64, ProviderError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::rejected("network", format!("download failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = if status == reqwest::StatusCode::NOT_FOUND {
                ProviderError::NotFound(url.to_string())
            } else {
                ProviderError::rejected(
                    "network",
                    format!("download failed with status {status}"),
                )
            };
            return Err(err);
        }

        let total = resp.content_length().unwrap_or(0);
        let tmp = temp_path(dest);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| ProviderError::rejected("io", format!("failed to create temp file: {e}")))?;

        emit.download_progress(DownloadProgress::new(0, total));
        let mut read: u64 = 0;
        let mut last_percent = 0u8;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(ProviderError::rejected(
                        "network",
                        format!("download read failed: {e}"),
                    ));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp);
                return Err(ProviderError::rejected(
                    "io",
                    format!("failed to write temp file: {e}"),
                ));
            }
            read += chunk.len() as u64;
            let progress = DownloadProgress::new(read, total);
            // Unknown length reports bytes only; known length reports on each percent step.
            if total == 0 || progress.progress != last_percent {
                last_percent = progress.progress;
                emit.download_progress(progress);
            }
        }

        file.flush()
            .await
            .map_err(|e| ProviderError::rejected("io", format!("failed to flush temp file: {e}")))?;
        drop(file);

        fs::rename(&tmp, dest)
            .map_err(|e| ProviderError::rejected("io", format!("failed to finalize download: {e}")))?;
        emit.download_progress(DownloadProgress::new(read, read.max(total)));
        debug!(bytes = read, "download complete");
        Ok(read)
    }

    pub(crate) fn list(&self) -> Result<Vec<DownloadedFile>, ProviderError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(ProviderError::rejected(
                    "io",
                    format!("failed to read {}: {err}", self.dir.display()),
                ))
            }
        };
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !meta.is_file() || name.contains(TMP_MARKER) {
                continue;
            }
            let last_modified = meta
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_millis() as i64)
                .unwrap_or(0);
            files.push(DownloadedFile {
                file_path: path.display().to_string(),
                file_name: name,
                file_size: meta.len(),
                last_modified_unix_millis: last_modified,
            });
        }
        files.sort_by(|a, b| {
            b.last_modified_unix_millis
                .cmp(&a.last_modified_unix_millis)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(files)
    }

    /// Deletes one download. Paths outside the downloads directory are
    /// refused rather than touched.
    pub(crate) fn delete(&self, file_path: &str) -> Result<bool, ProviderError> {
        let path = PathBuf::from(file_path);
        let Some(name) = path.file_name() else {
            return Ok(false);
        };
        if path.parent() != Some(self.dir.as_path()) {
            return Err(ProviderError::rejected(
                "invalid_path",
                format!("not a managed download: {file_path}"),
            ));
        }
        let target = self.dir.join(name);
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ProviderError::rejected(
                "io",
                format!("failed to delete {}: {err}", target.display()),
            )),
        }
    }

    pub(crate) fn clear(&self) -> Result<u32, ProviderError> {
        let mut removed = 0;
        for file in self.list()? {
            if fs::remove_file(&file.file_path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}{TMP_MARKER}{}", Uuid::new_v4()))
}

async fn copy_local(
    source: &Path,
    dest: &Path,
    emit: &ProviderEmitters,
) -> Result<u64, ProviderError> {
    if !source.is_file() {
        return Err(ProviderError::NotFound(source.display().to_string()));
    }
    let tmp = temp_path(dest);
    let size = tokio::fs::copy(source, &tmp)
        .await
        .map_err(|e| ProviderError::rejected("io", format!("failed to copy package: {e}")))?;
    fs::rename(&tmp, dest)
        .map_err(|e| ProviderError::rejected("io", format!("failed to finalize download: {e}")))?;
    emit.download_progress(DownloadProgress::new(size, size));
    Ok(size)
}
