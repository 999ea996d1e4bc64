//! Container registry manager
//!
//! Facade over the registry API: repository listing with resolved tag
//! digests, and tag deletion that verifies the tag exists before any
//! destructive call goes out.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::RegistryApi;
use crate::error::{FleetError, Result};
use crate::models::{ImageTag, Repository};

pub struct RegistryManager {
    api: Arc<dyn RegistryApi>,
}

impl RegistryManager {
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self { api }
    }

    /// All repositories with their tags and manifest digests. A tag whose
    /// manifest lookup fails is skipped with a warning rather than failing
    /// the whole listing.
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let names = self.api.list_repositories().await?;
        let mut repositories = Vec::with_capacity(names.len());

        for name in names {
            let tags = match self.api.list_tags(&name).await {
                Ok(tags) => tags,
                Err(FleetError::NotFound { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };

            let mut resolved = Vec::with_capacity(tags.len());
            for tag in tags {
                match self.api.tag_manifest(&name, &tag).await {
                    Ok(manifest) => resolved.push(ImageTag {
                        name: tag,
                        digest: manifest.digest,
                        size_bytes: manifest.size_bytes,
                        pushed_at: None,
                    }),
                    Err(e) => {
                        warn!(repository = %name, tag = %tag, error = %e, "Skipping unresolvable tag")
                    }
                }
            }

            repositories.push(Repository {
                name,
                tags: resolved,
            });
        }

        Ok(repositories)
    }

    /// Delete one tag's manifest by digest. Verifies the repository and
    /// tag exist first; nothing destructive runs for an unknown tag.
    pub async fn delete_image(&self, repository: &str, tag: &str) -> Result<()> {
        if repository.trim().is_empty() || tag.trim().is_empty() {
            return Err(FleetError::validation(
                "repository and tag must not be empty",
            ));
        }

        let tags = self.api.list_tags(repository).await?;
        if !tags.iter().any(|t| t == tag) {
            return Err(FleetError::not_found(
                "tag",
                format!("{}:{}", repository, tag),
            ));
        }

        let manifest = self.api.tag_manifest(repository, tag).await?;
        self.api.delete_manifest(repository, &manifest.digest).await?;
        info!(repository = %repository, tag = %tag, digest = %manifest.digest, "Image deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ManifestRef;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRegistry {
        repos: Vec<(String, Vec<String>)>,
        calls: Mutex<Vec<String>>,
    }

    impl MockRegistry {
        fn with(repos: &[(&str, &[&str])]) -> Self {
            Self {
                repos: repos
                    .iter()
                    .map(|(name, tags)| {
                        (
                            name.to_string(),
                            tags.iter().map(|t| t.to_string()).collect(),
                        )
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegistryApi for MockRegistry {
        async fn list_repositories(&self) -> crate::error::Result<Vec<String>> {
            Ok(self.repos.iter().map(|(name, _)| name.clone()).collect())
        }

        async fn list_tags(&self, repository: &str) -> crate::error::Result<Vec<String>> {
            self.repos
                .iter()
                .find(|(name, _)| name == repository)
                .map(|(_, tags)| tags.clone())
                .ok_or_else(|| FleetError::not_found("repository", repository))
        }

        async fn tag_manifest(
            &self,
            repository: &str,
            tag: &str,
        ) -> crate::error::Result<ManifestRef> {
            Ok(ManifestRef {
                digest: format!("sha256:{}-{}", repository.replace('/', "-"), tag),
                size_bytes: 1024,
            })
        }

        async fn delete_manifest(
            &self,
            repository: &str,
            digest: &str,
        ) -> crate::error::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete:{}@{}", repository, digest));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_list_repositories_resolves_digests() {
        let api = Arc::new(MockRegistry::with(&[
            ("app/web", &["v1", "v2"]),
            ("app/worker", &[]),
        ]));
        let manager = RegistryManager::new(api);

        let repos = manager.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].tags.len(), 2);
        assert_eq!(repos[0].tags[0].digest, "sha256:app-web-v1");
        assert!(repos[1].tags.is_empty());
    }

    #[tokio::test]
    async fn test_delete_image() {
        let api = Arc::new(MockRegistry::with(&[("app/web", &["v1"])]));
        let manager = RegistryManager::new(api.clone());

        manager.delete_image("app/web", "v1").await.unwrap();
        assert_eq!(api.calls(), vec!["delete:app/web@sha256:app-web-v1"]);
    }

    #[tokio::test]
    async fn test_delete_unknown_tag_makes_no_destructive_call() {
        let api = Arc::new(MockRegistry::with(&[("app/web", &["v1"])]));
        let manager = RegistryManager::new(api.clone());

        let err = manager.delete_image("app/web", "v9").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_repository() {
        let api = Arc::new(MockRegistry::with(&[]));
        let manager = RegistryManager::new(api);

        let err = manager.delete_image("ghost", "v1").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_rejects_empty_names() {
        let api = Arc::new(MockRegistry::with(&[]));
        let manager = RegistryManager::new(api);

        let err = manager.delete_image("", "v1").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        let err = manager.delete_image("app/web", " ").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
