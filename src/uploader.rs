use anyhow::{anyhow, Context};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::{str::FromStr, sync::Arc};
use tokio::fs;

use crate::{
    gcp::{access_token, METADATA_URL},
    types::ScreenshotArtifact,
    utils::PNG_CONTENT_TYPE,
};

/// Uploads screenshots into an object storage bucket.
pub struct Uploader {
    bucket: String,
    url: Url,
    client: Arc<Client>,
}

#[derive(Deserialize, Debug)]
struct StoredObject {
    name: String,
    bucket: String,
}

impl Uploader {
    pub fn new(bucket: &str) -> anyhow::Result<Self> {
        Self::with_url(bucket, Url::from_str("https://storage.googleapis.com/")?)
    }

    pub fn with_url(bucket: &str, url: Url) -> anyhow::Result<Self> {
        if bucket.is_empty() {
            return Err(anyhow!("bucket name is empty"));
        }
        Ok(Uploader {
            bucket: bucket.into(),
            url,
            client: Arc::new(Client::new()),
        })
    }

    pub fn upload_url(&self, object_name: &str) -> String {
        format!(
            "{}upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.url,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(object_name)
        )
    }

    /// Uploads the screenshot under its local file name, returns its `gs://` url.
    pub async fn upload_screenshot(&self, artifact: &ScreenshotArtifact) -> anyhow::Result<String> {
        let object_name = artifact.file_name();
        if object_name.is_empty() {
            return Err(anyhow!("screenshot path {:?} has no file name", artifact.local_path));
        }
        let data = fs::read(&artifact.local_path).await.context(format!(
            "could not read screenshot at {:?}",
            &artifact.local_path
        ))?;

        let token = access_token(&self.client, METADATA_URL).await?;
        let res = self
            .client
            .post(self.upload_url(&object_name))
            .bearer_auth(token)
            .header("Content-Type", PNG_CONTENT_TYPE)
            .body(data)
            .send()
            .await
            .context(format!("could not upload screenshot to bucket {}", self.bucket))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(anyhow!(res.text().await?));
        }
        let stored = res.json::<StoredObject>().await?;
        debug!("stored object {:?}", stored);

        Ok(format!("gs://{}/{}", stored.bucket, stored.name))
    }
}
