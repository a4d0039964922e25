//! Destinations for exported frames. Each upload returns the
//! `{name, subfolder, type}` reference the host stores alongside settings.

use std::future::Future;
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use settings::FrameRef;
use thiserror::Error;
use tracing::debug;

use crate::encode::EncodedFrame;

/// Storage class attached to every exported frame reference.
pub const FRAME_TYPE: &str = "temp";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid upload endpoint '{0}'")]
    Endpoint(String),
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait FrameUploader: Send + Sync + 'static {
    fn upload(
        &self,
        frame: EncodedFrame,
    ) -> impl Future<Output = Result<FrameRef, UploadError>> + Send;
}

/// Writes frames to `<root>/<subfolder>/<name>`.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
    subfolder: String,
}

impl DirectoryUploader {
    pub fn new(root: impl Into<PathBuf>, subfolder: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            subfolder: subfolder.into(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.subfolder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FrameUploader for DirectoryUploader {
    async fn upload(&self, frame: EncodedFrame) -> Result<FrameRef, UploadError> {
        let dir = self.output_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| UploadError::Io {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(&frame.name);
        tokio::fs::write(&path, &frame.bytes)
            .await
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(frame = frame.index, path = %path.display(), "wrote frame");
        Ok(FrameRef::new(frame.name, self.subfolder.clone(), FRAME_TYPE))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: Option<String>,
}

/// Posts frames as multipart form data to `<base>/upload/image`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: Client,
    endpoint: Url,
    subfolder: String,
}

impl HttpUploader {
    pub fn new(base: &str, subfolder: impl Into<String>) -> Result<Self, UploadError> {
        let base = Url::parse(base).map_err(|_| UploadError::Endpoint(base.to_string()))?;
        let endpoint = base
            .join("upload/image")
            .map_err(|_| UploadError::Endpoint(base.to_string()))?;
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            endpoint,
            subfolder: subfolder.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl FrameUploader for HttpUploader {
    async fn upload(&self, frame: EncodedFrame) -> Result<FrameRef, UploadError> {
        let part = Part::bytes(frame.bytes)
            .file_name(frame.name.clone())
            .mime_str(frame.format.mime())?;
        let form = Form::new()
            .part("image", part)
            .text("type", FRAME_TYPE)
            .text("subfolder", self.subfolder.clone());
        let response = self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: UploadResponse = response.json().await?;
        let name = body.name.unwrap_or(frame.name);
        debug!(frame = frame.index, %name, "uploaded frame");
        Ok(FrameRef::new(name, self.subfolder.clone(), FRAME_TYPE))
    }
}
