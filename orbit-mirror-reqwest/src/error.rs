/// Errors raised by this crate's `RemoteStore`/`GatewayFetcher` implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP response code wasn't one this client knows how to treat as
    /// success for the endpoint it called.
    #[error("Unexpected response status {status} from {url}: {body}")]
    UnexpectedStatusCode {
        /// The response status code.
        status: reqwest::StatusCode,
        /// The request URL, for diagnosis.
        url: String,
        /// The response body, truncated if large.
        body: String,
    },

    /// The remote store rejected the request's credentials (a 401/403).
    #[error("Authentication rejected by remote store: {0}")]
    AuthRejected(String),

    /// The response body didn't decode as the JSON shape this client expects.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// reqwest-level errors (connection, TLS, timeout at the transport level).
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// orbit-mirror core errors (CID bridging, address parsing).
    #[error(transparent)]
    OrbitMirror(#[from] orbit_mirror::Error),
}
