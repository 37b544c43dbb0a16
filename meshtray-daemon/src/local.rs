use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{TryStreamExt, future};
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    Method, Request, Response,
    body::{Frame, Incoming},
    header,
};
use hyper_util::rt::TokioIo;
use meshtray_core::{
    AccountProfile, MaskedPrefs, Notify, Prefs, ProfileId, StableNodeId, Status, WaitingFile,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{io::AsyncRead, net::UnixStream};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;

use crate::{BusSubscription, DaemonClient, DaemonError, Download};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/tailscale/tailscaled.sock";
/// Longest unterminated bus line buffered before the watch is dropped.
pub const DEFAULT_MAX_BUS_LINE: usize = 4 * 1024 * 1024;

const LOCAL_API_HOST: &str = "local-tailscaled.sock";
const LOCAL_API_BASE: &str = "http://local-tailscaled.sock/localapi/v0/";
const MAX_ERROR_BODY_CHARS: usize = 512;

type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// Talks to the daemon's LocalAPI: HTTP/1.1 over its unix socket, one
/// connection per request.
#[derive(Debug, Clone)]
pub struct LocalClient {
    socket_path: PathBuf,
    max_bus_line: usize,
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl LocalClient {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_bus_line: DEFAULT_MAX_BUS_LINE,
        }
    }

    #[must_use]
    pub fn with_max_bus_line(mut self, max_bus_line: usize) -> Self {
        self.max_bus_line = max_bus_line;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: RequestBody,
        content_length: Option<u64>,
    ) -> Result<Response<Incoming>, DaemonError> {
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_owned(),
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target.as_str())
            .header(header::HOST, LOCAL_API_HOST);
        if let Some(len) = content_length {
            builder = builder.header(header::CONTENT_LENGTH, len);
        }
        let request = builder
            .body(body)
            .map_err(|err| DaemonError::Request(err.to_string()))?;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| DaemonError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("local api connection ended: {}", err);
            }
        });

        debug!(%method, %target, "local api request");
        let response = sender.send_request(request).await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.into_body().collect().await?.to_bytes();
        let message: String = String::from_utf8_lossy(&body)
            .trim()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        warn!(%method, %target, status, "local api request failed: {}", message);
        Err(DaemonError::Http { status, message })
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        body: RequestBody,
    ) -> Result<T, DaemonError> {
        let response = self.send(method, url, body, None).await?;
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, DaemonError> {
        self.request_json(Method::GET, url, empty_body()).await
    }

    async fn discard(
        &self,
        method: Method,
        url: &Url,
        body: RequestBody,
        content_length: Option<u64>,
    ) -> Result<(), DaemonError> {
        let response = self.send(method, url, body, content_length).await?;
        response.into_body().collect().await?;
        Ok(())
    }
}

fn endpoint(segments: &[&str]) -> Result<Url, DaemonError> {
    let mut url = Url::parse(LOCAL_API_BASE).map_err(|err| DaemonError::Request(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| DaemonError::Request("local api base cannot carry a path".to_owned()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn empty_body() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn json_body<B: Serialize>(body: &B) -> Result<RequestBody, DaemonError> {
    let bytes = serde_json::to_vec(body)?;
    Ok(Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed_unsync())
}

impl DaemonClient for LocalClient {
    type Subscription = LocalBusWatcher;

    async fn status(&self) -> Result<Status, DaemonError> {
        self.get_json(&endpoint(&["status"])?).await
    }

    async fn watch_bus(&self) -> Result<LocalBusWatcher, DaemonError> {
        let mut url = endpoint(&["watch-ipn-bus"])?;
        url.query_pairs_mut().append_pair("mask", "0");
        let response = self.send(Method::GET, &url, empty_body(), None).await?;
        Ok(LocalBusWatcher::new(response.into_body(), self.max_bus_line))
    }

    async fn get_prefs(&self) -> Result<Prefs, DaemonError> {
        self.get_json(&endpoint(&["prefs"])?).await
    }

    async fn edit_prefs(&self, edit: &MaskedPrefs) -> Result<Prefs, DaemonError> {
        let body = json_body(edit)?;
        self.request_json(Method::PATCH, &endpoint(&["prefs"])?, body)
            .await
    }

    async fn await_waiting_files(&self, wait: Duration) -> Result<Vec<WaitingFile>, DaemonError> {
        let mut url = endpoint(&["files", ""])?;
        url.query_pairs_mut()
            .append_pair("waitsec", &wait.as_secs().to_string());
        let files: Option<Vec<WaitingFile>> = self.get_json(&url).await?;
        Ok(files.unwrap_or_default())
    }

    async fn get_waiting_file(&self, name: &str) -> Result<Download, DaemonError> {
        let url = endpoint(&["files", name])?;
        let response = self.send(Method::GET, &url, empty_body(), None).await?;
        let chunks = BodyStream::new(response.into_body())
            .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
            .map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(chunks)))
    }

    async fn delete_waiting_file(&self, name: &str) -> Result<(), DaemonError> {
        let url = endpoint(&["files", name])?;
        self.discard(Method::DELETE, &url, empty_body(), None).await
    }

    async fn push_file<R>(
        &self,
        target: &StableNodeId,
        size: u64,
        name: &str,
        reader: R,
    ) -> Result<(), DaemonError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let url = endpoint(&["file-put", target.as_str(), name])?;
        let body = StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)).boxed_unsync();
        self.discard(Method::PUT, &url, body, Some(size)).await
    }

    async fn profile_status(&self) -> Result<(AccountProfile, Vec<AccountProfile>), DaemonError> {
        let current: AccountProfile = self.get_json(&endpoint(&["profiles", "current"])?).await?;
        let all: Option<Vec<AccountProfile>> =
            self.get_json(&endpoint(&["profiles", ""])?).await?;
        Ok((current, all.unwrap_or_default()))
    }

    async fn switch_profile(&self, id: &ProfileId) -> Result<(), DaemonError> {
        let url = endpoint(&["profiles", id.as_str()])?;
        self.discard(Method::POST, &url, empty_body(), None).await
    }
}

/// Reads newline-delimited JSON notifications from a bus watch response.
#[derive(Debug)]
pub struct LocalBusWatcher {
    body: Incoming,
    buffer: BytesMut,
    max_line: usize,
}

impl LocalBusWatcher {
    fn new(body: Incoming, max_line: usize) -> Self {
        Self {
            body,
            buffer: BytesMut::new(),
            max_line,
        }
    }

    fn take_line(&mut self) -> Option<Bytes> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        Some(line.freeze())
    }
}

impl BusSubscription for LocalBusWatcher {
    async fn next(&mut self) -> Result<Notify, DaemonError> {
        loop {
            while let Some(line) = self.take_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(serde_json::from_slice(&line)?);
            }
            if self.buffer.len() > self.max_line {
                self.buffer.clear();
                return Err(DaemonError::BusLineTooLong {
                    limit: self.max_line,
                });
            }

            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buffer.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => return Err(DaemonError::Transport(err)),
                None => return Err(DaemonError::BusClosed),
            }
        }
    }
}
