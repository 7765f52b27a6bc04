use anyhow::{anyhow, Context};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";
pub const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/";

#[derive(Deserialize, Debug)]
struct MetadataToken {
    access_token: String,
}

pub fn default_project() -> Option<String> {
    std::env::var(PROJECT_ENV).ok().filter(|p| !p.is_empty())
}

async fn metadata_get(client: &Client, metadata_url: &str, path: &str) -> anyhow::Result<Response> {
    let url = format!("{}{}", metadata_url, path);
    let res = client
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context(format!("could not reach the metadata server at {}", url))?;

    if res.status() == StatusCode::OK {
        Ok(res)
    } else {
        Err(anyhow!(res.text().await?))
    }
}

/// Bearer token for Google APIs: the environment first, then the metadata server.
pub async fn access_token(client: &Client, metadata_url: &str) -> anyhow::Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    debug!("no {} set, asking the metadata server for a token", TOKEN_ENV);
    let res = metadata_get(client, metadata_url, "instance/service-accounts/default/token").await?;
    Ok(res.json::<MetadataToken>().await?.access_token)
}

/// Project owning the credentials, looked up the same way as the token.
pub async fn project_id(client: &Client, metadata_url: &str) -> anyhow::Result<String> {
    if let Some(project) = default_project() {
        return Ok(project);
    }

    debug!("no {} set, asking the metadata server for the project", PROJECT_ENV);
    let res = metadata_get(client, metadata_url, "project/project-id").await?;
    let project = res.text().await?.trim().to_string();
    if project.is_empty() {
        return Err(anyhow!("metadata server returned an empty project id"));
    }
    Ok(project)
}
