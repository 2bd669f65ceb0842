use std::{collections::HashSet, path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{default_extensions, has_allowed_extension, TrackCatalog};
use crate::{
    error::{Error, Result},
    track::TrackRef,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Audio links scraped from an HTML index page (directory listing, etc.).
///
/// Links are resolved against the page URL and kept in document order.
#[derive(Debug, Clone)]
pub struct HttpIndexCatalog {
    client: Client,
    index_url: Url,
    extensions: Vec<String>,
    timeout: Duration,
}

impl HttpIndexCatalog {
    pub fn new(index_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            index_url: Url::parse(index_url)?,
            extensions: default_extensions(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn extract_tracks(&self, html: &str) -> Vec<TrackRef> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| self.index_url.join(href.trim()).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .filter(|url| {
                let path = url.path();
                let last = path.rsplit('/').next().unwrap_or(path);
                has_allowed_extension(Path::new(last), &self.extensions)
            })
            .map(|mut url| {
                url.set_fragment(None);
                url.to_string()
            })
            .filter(|id| seen.insert(id.clone()))
            .map(TrackRef::new)
            .collect()
    }
}

#[async_trait]
impl TrackCatalog for HttpIndexCatalog {
    async fn refresh(&self) -> Result<Vec<TrackRef>> {
        let response = self
            .client
            .get(self.index_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::catalog(format!("cannot fetch {}: {}", self.index_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::catalog(format!(
                "{} returned HTTP {}",
                self.index_url, status
            )));
        }

        let html = response.text().await?;
        let tracks = self.extract_tracks(&html);
        debug!(url = %self.index_url, tracks = tracks.len(), "Index page scraped");
        Ok(tracks)
    }

    fn describe(&self) -> String {
        format!("HTTP index {}", self.index_url)
    }
}
