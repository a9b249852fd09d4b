//! Single-request transport.
//!
//! A [`Transport`] sends one multipart payload (a chunk or a whole file) and
//! returns the parsed server reply. [`HttpTransport`] is the `reqwest`
//! implementation; tests substitute their own.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chunklift_protocol::constants::{
    DEFAULT_MIME_TYPE, FIELD_CHUNK_INDEX, FIELD_FILE_NAME, FIELD_FILE_SIZE, FIELD_FILE_TYPE,
    FIELD_TOTAL_CHUNKS,
};
use chunklift_protocol::{HttpMethod, ResponseBody, ServerResponse};
use chunklift_transfer::is_media_type;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{UploadError, UploadOptions};

/// Piece size used when streaming a whole file so progress can be observed.
const STREAM_PIECE_SIZE: usize = 64 * 1024;

/// Observes bytes as they are handed to the connection.
pub type ByteCounter = Arc<dyn Fn(u64) + Send + Sync>;

/// Where and how requests for one upload are sent.
#[derive(Debug, Clone, Default)]
pub struct RequestTarget {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub field_name: String,
    pub fields: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub with_credentials: bool,
}

impl From<&UploadOptions> for RequestTarget {
    fn from(opts: &UploadOptions) -> Self {
        Self {
            url: opts.url.clone(),
            method: opts.method,
            headers: opts.headers.clone(),
            params: opts.params.clone(),
            field_name: opts.field_name.clone(),
            fields: opts.fields.clone(),
            timeout: opts.timeout,
            with_credentials: opts.with_credentials,
        }
    }
}

/// Text fields describing a chunk's place in the original file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub index: usize,
    pub total_chunks: usize,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
}

impl ChunkMetadata {
    /// Multipart text fields, in wire order.
    pub fn form_fields(&self) -> [(&'static str, String); 5] {
        [
            (FIELD_CHUNK_INDEX, self.index.to_string()),
            (FIELD_TOTAL_CHUNKS, self.total_chunks.to_string()),
            (FIELD_FILE_NAME, self.file_name.clone()),
            (FIELD_FILE_SIZE, self.file_size.to_string()),
            (FIELD_FILE_TYPE, self.file_type.clone()),
        ]
    }
}

/// One request to send.
pub struct TransferRequest {
    pub target: Arc<RequestTarget>,
    pub payload: Vec<u8>,
    /// File name on the binary part.
    pub file_name: String,
    /// Content type of the binary part.
    pub mime_type: String,
    /// Present for chunk requests.
    pub chunk: Option<ChunkMetadata>,
    /// Aborts the request when cancelled.
    pub cancel: CancellationToken,
    /// Called with the size of every piece streamed out.
    pub progress: Option<ByteCounter>,
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("url", &self.target.url)
            .field("payload_len", &self.payload.len())
            .field("file_name", &self.file_name)
            .field("chunk", &self.chunk)
            .finish()
    }
}

/// Sends a single upload request.
///
/// Implementations must resolve to [`UploadError::Cancelled`] once the
/// request's token is cancelled, without waiting for the server.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServerResponse, UploadError>> + Send + '_>>;
}

/// `reqwest`-backed transport.
///
/// Holds two clients: requests made `with_credentials` share a cookie store,
/// the rest never send or keep cookies.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    plain: reqwest::Client,
    credentialed: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, UploadError> {
        let plain = reqwest::Client::builder().build()?;
        let credentialed = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            plain,
            credentialed,
        })
    }

    fn client(&self, with_credentials: bool) -> &reqwest::Client {
        if with_credentials {
            &self.credentialed
        } else {
            &self.plain
        }
    }

    async fn execute(&self, request: TransferRequest) -> Result<ServerResponse, UploadError> {
        let TransferRequest {
            target,
            payload,
            file_name,
            mime_type,
            chunk,
            cancel,
            progress,
        } = request;

        let part = binary_part(payload, progress)
            .file_name(file_name)
            .mime_str(content_type(&mime_type))?;

        let mut form = Form::new().part(target.field_name.clone(), part);
        if let Some(meta) = &chunk {
            for (name, value) in meta.form_fields() {
                form = form.text(name, value);
            }
        }
        for (name, value) in &target.fields {
            form = form.text(name.clone(), value.clone());
        }

        let mut builder = self
            .client(target.with_credentials)
            .request(method(target.method), &target.url)
            .query(&target.params)
            .multipart(form);
        for (name, value) in &target.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = target.timeout {
            builder = builder.timeout(timeout);
        }

        debug!(
            url = %target.url,
            method = target.method.as_str(),
            chunk = chunk.as_ref().map(|c| c.index),
            "sending upload request"
        );

        let exchange = async {
            let response = builder.send().await.map_err(map_reqwest)?;
            let status = response.status();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_ascii_lowercase(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let bytes = response.bytes().await.map_err(map_reqwest)?;

            if !status.is_success() {
                return Err(UploadError::Transport {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }

            let body = ResponseBody::parse(headers.get("content-type").map(String::as_str), &bytes);
            Ok(ServerResponse {
                status: status.as_u16(),
                headers,
                body,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = exchange => result,
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ServerResponse, UploadError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

fn map_reqwest(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::Timeout
    } else {
        UploadError::Http(err)
    }
}

/// Falls back to the generic binary type when `mime` is not a media type.
fn content_type(mime: &str) -> &str {
    if is_media_type(mime) {
        mime
    } else {
        DEFAULT_MIME_TYPE
    }
}

/// Builds the binary part. With a counter, the payload is streamed in
/// pieces and each piece is reported as the connection pulls it.
fn binary_part(payload: Vec<u8>, progress: Option<ByteCounter>) -> Part {
    let Some(counter) = progress else {
        return Part::bytes(payload);
    };

    let len = payload.len() as u64;
    let pieces: Vec<Vec<u8>> = payload
        .chunks(STREAM_PIECE_SIZE)
        .map(<[u8]>::to_vec)
        .collect();
    let stream = futures_util::stream::iter(pieces).map(move |piece| {
        counter(piece.len() as u64);
        Ok::<_, std::io::Error>(piece)
    });
    Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
}
