//! HTTP client for the remote music library API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::models::*;

/// Tunables for the HTTP client.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
    /// Attempts per request for transient failures, including the first.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
}

/// HTTP implementation of [`MusicApi`].
///
/// Transient failures (transport errors and 5xx) are retried in here with
/// exponential backoff; 429 is surfaced as [`RemoteError::RateLimited`]
/// without retrying because the sync engine owns the rate-limit wait.
pub struct HttpMusicApi {
    client: reqwest::Client,
    settings: RemoteSettings,
}

impl HttpMusicApi {
    pub fn new(settings: RemoteSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let settings = RemoteSettings {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            ..settings
        };

        Self { client, settings }
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> RemoteResult<T> {
        let url = format!("{}{}", self.settings.base_url, path_and_query);
        let mut backoff = Duration::from_secs(self.settings.initial_backoff_secs);

        for attempt in 1..=self.settings.max_attempts {
            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.settings.api_token)
                .send()
                .await;

            let transient = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            RemoteError::Permanent(format!("Malformed response from {}: {}", url, e))
                        });
                    }
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after_secs = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        debug!(url, ?retry_after_secs, "Remote returned 429");
                        return Err(RemoteError::RateLimited { retry_after_secs });
                    }
                    if status.is_server_error() {
                        format!("{} returned {}", url, status)
                    } else {
                        return Err(RemoteError::Permanent(format!(
                            "{} returned {}",
                            url, status
                        )));
                    }
                }
                Err(e) => format!("Request to {} failed: {}", url, e),
            };

            if attempt == self.settings.max_attempts {
                return Err(RemoteError::Transient(transient));
            }
            warn!(
                url,
                attempt,
                error = %transient,
                "Transient remote failure, retrying in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        // The loop always returns by the last attempt.
        Err(RemoteError::Transient(format!("{} exhausted retries", url)))
    }
}

#[async_trait]
impl MusicApi for HttpMusicApi {
    async fn list_saved_tracks(&self, offset: u64, limit: u64) -> RemoteResult<Page<SavedTrack>> {
        self.get_json(&format!("/me/tracks?offset={}&limit={}", offset, limit))
            .await
    }

    async fn get_several_artists(&self, ids: &[String]) -> RemoteResult<Vec<ArtistDetails>> {
        self.get_json(&format!("/artists?ids={}", ids.join(",")))
            .await
    }

    async fn get_several_albums(&self, ids: &[String]) -> RemoteResult<Vec<AlbumDetails>> {
        self.get_json(&format!("/albums?ids={}", ids.join(","))).await
    }

    async fn list_playlists(&self, offset: u64, limit: u64) -> RemoteResult<Page<RemotePlaylist>> {
        self.get_json(&format!("/me/playlists?offset={}&limit={}", offset, limit))
            .await
    }

    async fn get_playlist_tracks(&self, id: &str) -> RemoteResult<Vec<String>> {
        self.get_json(&format!("/playlists/{}/tracks", id)).await
    }
}
