//! Container registry CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, DeleteImageResponse, Repository};
use crate::output::{format_bytes, print_success, print_warning, OutputFormat};

/// Row for the repositories table
#[derive(Tabled)]
struct TagRow {
    #[tabled(rename = "Repository")]
    repository: String,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Digest")]
    digest: String,
    #[tabled(rename = "Size")]
    size: String,
}

/// List repositories and their tags
pub async fn list_repositories(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let repositories: Vec<Repository> = client.get("api/v1/registry/repositories").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&repositories)?);
        }
        OutputFormat::Table => {
            if repositories.is_empty() {
                print_warning("No repositories found");
                return Ok(());
            }

            let mut rows = Vec::new();
            for repo in &repositories {
                if repo.tags.is_empty() {
                    rows.push(TagRow {
                        repository: repo.name.clone(),
                        tag: "-".to_string(),
                        digest: "-".to_string(),
                        size: "-".to_string(),
                    });
                    continue;
                }
                for tag in &repo.tags {
                    rows.push(TagRow {
                        repository: repo.name.clone(),
                        tag: tag.name.clone(),
                        digest: truncate_digest(&tag.digest),
                        size: format_bytes(tag.size_bytes),
                    });
                }
            }

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} repositories", repositories.len());
        }
    }

    Ok(())
}

/// Delete one image tag from the registry
pub async fn delete_image(
    client: &ApiClient,
    repository: &str,
    tag: &str,
    format: OutputFormat,
) -> Result<()> {
    let path = format!(
        "api/v1/registry/image?repository={}&tag={}",
        repository, tag
    );
    let response: DeleteImageResponse = client.delete(&path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Table => {
            print_success(&format!(
                "Deleted {}:{} from registry",
                response.repository, response.tag
            ));
        }
    }

    Ok(())
}

fn truncate_digest(digest: &str) -> String {
    let trimmed = digest.strip_prefix("sha256:").unwrap_or(digest);
    if trimmed.len() > 12 {
        format!("{}…", &trimmed[..12])
    } else {
        trimmed.to_string()
    }
}
