//! AudioBookShelf API adapter for post-sync notification.
//!
//! After a run places new books, the destination server still has to scan
//! them in and (because its scanner sometimes misidentifies Audible
//! content) force-match them against the Audible provider by ASIN. Every
//! call here is best-effort: the sync outcome is already decided by the
//! time this client runs.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ServerSettings;
use crate::domain::CompletedBook;

/// How long to let the server's scan settle before matching.
const SCAN_BACKOFF: Duration = Duration::from_secs(15);

/// Pause between match requests so the server isn't hammered.
const MATCH_PAUSE: Duration = Duration::from_secs(2);

/// AudioBookShelf API client
pub struct BookshelfClient {
    base_url: String,
    api_token: String,
    library_id: String,
    client: reqwest::Client,
}

/// Item listing envelope from the server
#[derive(Debug, Deserialize)]
struct ItemListing {
    results: Vec<LibraryItem>,
}

/// One library item, trimmed to the fields matching needs
#[derive(Debug, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub media: ItemMedia,
}

#[derive(Debug, Deserialize)]
pub struct ItemMedia {
    pub metadata: ItemMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "authorName")]
    pub author_name: Option<String>,
}

impl BookshelfClient {
    /// Create a client from the configured server block.
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            library_id: settings.library_id.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Kick off a library scan so the server picks up newly placed books.
    pub async fn trigger_scan(&self) -> Result<()> {
        let url = self.api_url(&format!("libraries/{}/scan", self.library_id));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to reach AudioBookShelf for a library scan")?;

        if !response.status().is_success() {
            anyhow::bail!("library scan request returned {}", response.status());
        }
        Ok(())
    }

    /// List the library's items, most recently added included.
    pub async fn list_items(&self) -> Result<Vec<LibraryItem>> {
        let url = self.api_url(&format!("libraries/{}/items?sort=addedAt", self.library_id));

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("Failed to fetch the AudioBookShelf library")?;

        if !response.status().is_success() {
            anyhow::bail!("item listing returned {}", response.status());
        }

        let listing: ItemListing = response
            .json()
            .await
            .context("Failed to parse the AudioBookShelf item listing")?;

        Ok(listing.results)
    }

    /// Force-match one item against the Audible provider by ASIN.
    pub async fn match_item(&self, item: &LibraryItem, asin: &str) -> Result<()> {
        let url = self.api_url(&format!("items/{}/match", item.id));

        let payload = serde_json::json!({
            "author": item.media.metadata.author_name,
            "provider": "audible",
            "asin": asin,
            "title": item.media.metadata.title,
            "overrideDefaults": "true",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .context("Failed to send match request")?;

        if !response.status().is_success() {
            anyhow::bail!("match request returned {}", response.status());
        }
        Ok(())
    }

    /// Scan, wait for the scanner to settle, then match every completed
    /// book by ASIN. Failures are logged and swallowed.
    pub async fn notify_completed(&self, completed: &[CompletedBook]) {
        if completed.is_empty() {
            return;
        }

        if let Err(e) = self.trigger_scan().await {
            warn!(error = %e, "Skipping server notification");
            return;
        }
        info!(books = completed.len(), "Triggered library scan; waiting for it to settle");
        tokio::time::sleep(SCAN_BACKOFF).await;

        let items = match self.list_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cannot list library items; skipping match pass");
                return;
            }
        };

        for book in completed {
            let matched = items.iter().find(|item| {
                item.media
                    .metadata
                    .title
                    .as_deref()
                    .map(|t| t.contains(&book.title) || book.title.contains(t))
                    .unwrap_or(false)
            });

            match matched {
                Some(item) => match self.match_item(item, &book.source_id).await {
                    Ok(()) => info!(title = %book.title, "Matched against the Audible provider"),
                    Err(e) => warn!(title = %book.title, error = %e, "Match failed"),
                },
                None => warn!(title = %book.title, "Book not visible in the library yet"),
            }

            tokio::time::sleep(MATCH_PAUSE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BookshelfClient {
        BookshelfClient::new(&ServerSettings {
            url: "http://abs.local:13378/".to_string(),
            api_token: "token".to_string(),
            library_id: "lib1".to_string(),
        })
    }

    #[test]
    fn test_api_url_strips_trailing_slash() {
        let client = client();
        assert_eq!(
            client.api_url("libraries/lib1/scan"),
            "http://abs.local:13378/api/libraries/lib1/scan"
        );
    }

    #[test]
    fn test_item_listing_parses_server_shape() {
        let json = r#"{
            "results": [
                {"id": "li_1", "media": {"metadata": {"title": "First Book", "authorName": "Jane Doe"}}},
                {"id": "li_2", "media": {"metadata": {}}}
            ]
        }"#;

        let listing: ItemListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.results.len(), 2);
        assert_eq!(
            listing.results[0].media.metadata.title.as_deref(),
            Some("First Book")
        );
        assert!(listing.results[1].media.metadata.title.is_none());
    }
}
