//! A `RemoteStore` backed by an HTTP API shaped like Storacha/w3up's three
//! layers (upload, store, blob).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use libipld::Cid;
use orbit_mirror::{
    cid_bridge::render_base32,
    model::ManifestPage,
    remote::{AuthProvider, ContainerId, Credentials, Layer, RemoteStore, UploadOutcome},
};
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::Error;

fn layer_segment(layer: Layer) -> &'static str {
    match layer {
        Layer::Upload => "upload",
        Layer::Store => "store",
        Layer::Blob => "blob",
    }
}

/// How a response status should be treated, independent of the response body
/// — split out from `HttpRemoteStore::check_status` so it's testable without
/// constructing a real `reqwest::Response`.
enum StatusOutcome {
    Success,
    AuthRejected,
    Unexpected,
}

fn classify_status(status: reqwest::StatusCode) -> StatusOutcome {
    if status.is_success() {
        StatusOutcome::Success
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        StatusOutcome::AuthRejected
    } else {
        StatusOutcome::Unexpected
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    cid: String,
}

/// A `RemoteStore` implementation that talks to a Storacha/w3up-shaped HTTP
/// API: `POST {base}/blob`, `GET {base}/upload?container=..&cursor=..`,
/// `DELETE {base}/{layer}/{cid}`.
pub struct HttpRemoteStore {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
    credentials: Credentials,
    container: ContainerId,
}

impl HttpRemoteStore {
    /// Build a client scoped to `container`, authenticating every request
    /// with headers produced by `auth` from `credentials`.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        credentials: Credentials,
        container: ContainerId,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth,
            credentials,
            container,
        }
    }

    async fn auth_headers(&self) -> Result<Vec<(String, String)>, Error> {
        self.auth
            .auth_headers(&self.credentials)
            .await
            .map_err(|e| Error::AuthRejected(e.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        match classify_status(status) {
            StatusOutcome::Success => Ok(response),
            StatusOutcome::AuthRejected => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::AuthRejected(format!("{status}: {body}")))
            }
            StatusOutcome::Unexpected => {
                let url = response.url().to_string();
                let body = response.text().await.unwrap_or_default();
                Err(Error::UnexpectedStatusCode { status, url, body })
            }
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self, bytes))]
    async fn upload(&self, bytes: Bytes, name: &str) -> anyhow::Result<UploadOutcome> {
        let headers = self.auth_headers().await?;
        let mut request = self
            .http
            .post(format!("{}/blob", self.base_url))
            .query(&[("container", self.container.0.as_str()), ("name", name)])
            .body(bytes);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = Self::check_status(request.send().await.map_err(Error::from)?).await?;
        let parsed: UploadResponse = response.json().await.map_err(Error::from)?;
        let cid_raw = Cid::try_from(parsed.cid.as_str())
            .map_err(|e| anyhow::anyhow!("remote store returned an unparseable cid: {e}"))?;
        Ok(UploadOutcome { cid_raw })
    }

    #[instrument(skip(self))]
    async fn list(&self, limit: Option<usize>, cursor: Option<&str>) -> anyhow::Result<ManifestPage> {
        let headers = self.auth_headers().await?;
        let mut query = vec![("container", self.container.0.clone())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let mut request = self.http.get(format!("{}/upload", self.base_url)).query(&query);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = Self::check_status(request.send().await.map_err(Error::from)?).await?;
        let page: ManifestPage = response.json().await.map_err(Error::from)?;
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn remove(&self, layer: Layer, cid: &Cid) -> anyhow::Result<()> {
        let headers = self.auth_headers().await?;
        let rendered = render_base32(cid).map_err(Error::from)?;
        let url = format!("{}/{}/{}", self.base_url, layer_segment(layer), rendered);
        let mut request = self.http.delete(&url).query(&[("container", self.container.0.as_str())]);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        match Self::check_status(request.send().await.map_err(Error::from)?).await {
            Ok(_) => Ok(()),
            Err(Error::UnexpectedStatusCode { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => {
                warn!(%cid, ?layer, "object already absent from remote store during remove");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn current_container(&self) -> ContainerId {
        self.container.clone()
    }

    fn select_container(&mut self, container: ContainerId) {
        self.container = container;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_segment_matches_the_three_remote_layers() {
        assert_eq!(layer_segment(Layer::Upload), "upload");
        assert_eq!(layer_segment(Layer::Store), "store");
        assert_eq!(layer_segment(Layer::Blob), "blob");
    }

    #[test]
    fn not_found_is_unexpected_status_not_auth_rejected() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::NOT_FOUND),
            StatusOutcome::Unexpected
        ));
    }

    #[test]
    fn unauthorized_and_forbidden_are_auth_rejected() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED),
            StatusOutcome::AuthRejected
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::FORBIDDEN),
            StatusOutcome::AuthRejected
        ));
    }

    #[test]
    fn success_codes_classify_as_success() {
        assert!(matches!(classify_status(reqwest::StatusCode::OK), StatusOutcome::Success));
        assert!(matches!(classify_status(reqwest::StatusCode::CREATED), StatusOutcome::Success));
    }
}
