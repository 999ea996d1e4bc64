//! Container registry API client
//!
//! Speaks the Docker Registry HTTP API v2: catalog listing, tag listing,
//! manifest digest lookup and manifest deletion.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{ManifestRef, RegistryApi};
use crate::config::RegistryConfig;
use crate::error::{FleetError, Result};

const SERVICE: &str = "registry";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

pub struct RegistryClient {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetError::configuration(format!("registry HTTP client: {}", e)))?;

        let mut base = config.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FleetError::configuration(format!("registry URL: {}", e)))?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FleetError::internal(format!("invalid path '{}': {}", path, e)))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(FleetError::upstream(
            SERVICE,
            format!("{} returned status {}", context, status),
        ))
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        let url = self.url("v2/_catalog")?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        let response = self.check(response, "catalog").await?;
        let payload: Catalog = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.repositories)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = self.url(&format!("v2/{}/tags/list", repository))?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("repository", repository));
        }
        let response = self.check(response, "tags list").await?;
        let payload: TagList = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.tags.unwrap_or_default())
    }

    async fn tag_manifest(&self, repository: &str, tag: &str) -> Result<ManifestRef> {
        let url = self.url(&format!("v2/{}/manifests/{}", repository, tag))?;
        let response = self
            .request(self.client.head(url))
            .header(header::ACCEPT, MANIFEST_V2)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found(
                "tag",
                format!("{}:{}", repository, tag),
            ));
        }
        let response = self.check(response, "manifest head").await?;

        let digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                FleetError::upstream(SERVICE, "manifest response missing content digest")
            })?;
        let size_bytes = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(ManifestRef { digest, size_bytes })
    }

    async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()> {
        let url = self.url(&format!("v2/{}/manifests/{}", repository, digest))?;
        let response = self
            .request(self.client.delete(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("manifest", digest));
        }
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Err(FleetError::upstream(
                SERVICE,
                "registry has deletion disabled",
            ));
        }
        self.check(response, "manifest delete").await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    // A repository with all tags deleted reports "tags": null
    #[serde(default)]
    tags: Option<Vec<String>>,
}
