//! Local listener for the OAuth redirect.
//!
//! When the configured redirect URL points at this machine, `connect` can
//! wait for the browser to come back with the authorization code instead of
//! asking the user to copy it by hand.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use tracing::debug;
use url::Url;

/// How long one connection may take to send its request line.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Redirect URL {0} is not a local http address")]
    NotLocal(String),

    #[error("Could not bind callback listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Callback listener I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authorization was denied: {0}")]
    Denied(String),

    #[error("Timed out waiting for the authorization callback")]
    Timeout,
}

/// Query parameters delivered to the redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

pub struct CallbackListener {
    listener: TcpListener,
    path: String,
    read_timeout: Duration,
}

impl CallbackListener {
    /// Bind the host and port of `redirect_url`. Only loopback http URLs are
    /// accepted.
    pub async fn bind(redirect_url: &str) -> Result<Self, CallbackError> {
        let url =
            Url::parse(redirect_url).map_err(|_| CallbackError::NotLocal(redirect_url.to_string()))?;
        let host = match url.host_str() {
            Some("localhost") => "127.0.0.1".to_string(),
            Some(host @ ("127.0.0.1" | "[::1]")) => host.to_string(),
            _ => return Err(CallbackError::NotLocal(redirect_url.to_string())),
        };
        if url.scheme() != "http" {
            return Err(CallbackError::NotLocal(redirect_url.to_string()));
        }
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{}:{}", host, port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| CallbackError::Bind {
                addr: addr.clone(),
                source,
            })?;
        debug!(%addr, path = %url.path(), "OAuth callback listener bound");
        Ok(Self {
            listener,
            path: url.path().to_string(),
            read_timeout: REQUEST_READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener.local_addr().ok().map(|addr| addr.port())
    }

    /// Accept connections until one hits the redirect path with a `code` or
    /// an `error` parameter. Other requests get a 404; connections that fail
    /// or stay silent are dropped.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackParams, CallbackError> {
        tokio::time::timeout(timeout, self.accept_loop())
            .await
            .map_err(|_| CallbackError::Timeout)?
    }

    async fn accept_loop(self) -> Result<CallbackParams, CallbackError> {
        loop {
            let (mut socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(error = %e, "Failed to accept callback connection");
                    continue;
                }
            };

            let mut request_line = String::new();
            let read = tokio::time::timeout(
                self.read_timeout,
                BufReader::new(&mut socket).read_line(&mut request_line),
            )
            .await;
            match read {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(%peer, error = %e, "Dropping callback connection");
                    continue;
                }
                Err(_) => {
                    debug!(%peer, "Callback connection sent no request line");
                    continue;
                }
            }

            match parse_request_line(&request_line, &self.path) {
                Some(Ok(params)) => {
                    respond(&mut socket, "200 OK", "Authorization complete. You can close this window.")
                        .await;
                    return Ok(params);
                }
                Some(Err(reason)) => {
                    respond(&mut socket, "400 Bad Request", "Authorization failed.").await;
                    return Err(CallbackError::Denied(reason));
                }
                None => respond(&mut socket, "404 Not Found", "Not found.").await,
            }
        }
    }
}

async fn respond(socket: &mut tokio::net::TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// `None` when the request is not for the callback path.
fn parse_request_line(line: &str, path: &str) -> Option<Result<CallbackParams, String>> {
    let target = line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://callback{}", target)).ok()?;
    if url.path() != path {
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(Err(error));
    }
    code.map(|code| Ok(CallbackParams { code, state }))
}
