//! An ordered-gateway HTTP downloader: `GatewayFetcher` implemented over
//! plain `reqwest::Client` GETs, one client shared across every configured
//! gateway base URL (the download pipeline itself owns the failover loop
//! and per-attempt timeout, see `orbit_mirror::download`).

use async_trait::async_trait;
use bytes::Bytes;
use libipld::Cid;
use orbit_mirror::{cid_bridge::render_base32, download::GatewayFetcher};
use tracing::instrument;

use crate::Error;

/// Fetches objects from IPFS-gateway-shaped URLs: `GET {gateway_base}/ipfs/{cid}`.
pub struct HttpGatewayFetcher {
    http: reqwest::Client,
}

impl HttpGatewayFetcher {
    /// Build a fetcher sharing a single underlying `reqwest::Client` across
    /// every gateway it's asked to try.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpGatewayFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl GatewayFetcher for HttpGatewayFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, gateway_base: &str, cid_raw: &Cid) -> anyhow::Result<Bytes> {
        let rendered = render_base32(cid_raw).map_err(Error::from)?;
        let url = format!("{}/ipfs/{}", gateway_base.trim_end_matches('/'), rendered);
        let response = self.http.get(&url).send().await.map_err(Error::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UnexpectedStatusCode { status, url, body }.into());
        }

        Ok(response.bytes().await.map_err(Error::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fetcher_builds_without_panicking() {
        let _fetcher = HttpGatewayFetcher::default();
    }
}
