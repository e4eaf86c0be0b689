//! Streams a multipart upload through a bounded pipe.
//!
//! A background producer writes the frame preamble, the file payload in bounded reads, and
//! the trailer into an mpsc pipe. The consumer end becomes the reqwest body, with an explicit
//! `content-length` computed up front from the frame so no chunked encoding is used.

use std::io;

use futures::Stream;
use reqwest::{
    Body, Client,
    header::{CONTENT_LENGTH, CONTENT_TYPE, REFERER},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::UploadError;
use crate::frame::MultipartFrame;

pub const DEFAULT_CHUNK_SIZE: usize = 256;
const PIPE_CAPACITY: usize = 8;

/// One upload attempt. The reader is consumed by the attempt and cannot be replayed.
pub struct UploadRequest<R> {
    pub file_name: String,
    pub file_size: u64,
    pub file_reader: R,
    pub field_token: String,
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub endpoint: Url,
    pub referer: Option<String>,
    pub file_field: String,
    pub chunk_size: usize,
    /// Log request headers and the raw response.
    pub debug: bool,
}

impl TransportOptions {
    pub fn new(endpoint: Url, file_field: impl Into<String>) -> Self {
        Self {
            endpoint,
            referer: None,
            file_field: file_field.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            debug: false,
        }
    }
}

/// Body bytes handed to the transport so far, out of the full request length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

enum Fed {
    Complete { streamed: u64 },
    Interrupted,
}

/// Uploads `request` as `multipart/form-data` and returns the fully drained response body.
///
/// Cancelling `cancel` aborts the round trip and stops the producer. Each chunk handed to
/// the transport is reported on `progress`, if given, against the full body length.
///
/// A source that fails, ends early or overruns its declared size still gets its trailer
/// written, so the request terminates rather than hangs; the attempt then fails with
/// [`UploadError::SourceRead`] or [`UploadError::SizeMismatch`] in preference to whatever
/// the transport reported.
#[tracing::instrument(skip_all, fields(file = %request.file_name, size = request.file_size))]
pub async fn upload<R>(
    client: &Client,
    options: &TransportOptions,
    request: UploadRequest<R>,
    cancel: &CancellationToken,
    progress: Option<mpsc::Sender<UploadProgress>>,
) -> Result<Vec<u8>, UploadError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    if options.debug {
        info!("start upload");
    }

    let UploadRequest {
        file_name,
        file_size,
        file_reader,
        field_token,
    } = request;

    let frame = MultipartFrame::build(&field_token, &options.file_field, &file_name)?;
    let total_size = frame.content_length(file_size);
    let content_type = frame.content_type();
    debug!(
        preamble = frame.preamble.len(),
        trailer = frame.trailer.len(),
        total_size,
        "framed upload"
    );

    let (pipe_tx, pipe_rx) = mpsc::channel(PIPE_CAPACITY);
    let feeding = cancel.child_token();
    let producer = tokio::spawn(feed(
        frame.preamble,
        frame.trailer,
        file_reader,
        file_size,
        pipe_tx,
        feeding.clone(),
        options.chunk_size.max(1),
    ));

    let body = Body::wrap_stream(drain_pipe(pipe_rx, total_size, progress));
    let sent = tokio::select! {
        biased;
        _ = feeding.cancelled() => Err(UploadError::Cancelled),
        result = send(client, options, body, total_size, &content_type) => result,
    };

    // The round trip is over either way; a producer still blocked on its source must not
    // outlive it.
    feeding.cancel();
    let fed = producer
        .await
        .map_err(|e| UploadError::Producer(e.to_string()))??;

    match fed {
        Fed::Complete { streamed } if streamed != file_size => {
            return Err(UploadError::SizeMismatch {
                declared: file_size,
                streamed,
            });
        }
        Fed::Complete { streamed } => trace!(streamed, "producer finished"),
        Fed::Interrupted => trace!("producer interrupted"),
    }

    sent
}

async fn send(
    client: &Client,
    options: &TransportOptions,
    body: Body,
    total_size: u64,
    content_type: &str,
) -> Result<Vec<u8>, UploadError> {
    let mut builder = client
        .post(options.endpoint.clone())
        .header(CONTENT_LENGTH, total_size)
        .header(CONTENT_TYPE, content_type);
    if let Some(referer) = &options.referer {
        builder = builder.header(REFERER, referer.as_str());
    }
    let request = builder.body(body).build()?;

    if options.debug {
        info!("header: {:?}", request.headers());
    }

    let response = client.execute(request).await.inspect_err(|e| {
        if options.debug {
            info!("do requests returns error: {e}");
        }
    })?;
    let status = response.status();

    let body = response.bytes().await.inspect_err(|e| {
        if options.debug {
            info!("read response returns: {e}");
        }
    })?;

    if options.debug {
        info!(%status, "returns: {}", String::from_utf8_lossy(&body));
    }

    Ok(body.to_vec())
}

async fn feed<R>(
    preamble: Vec<u8>,
    trailer: Vec<u8>,
    mut reader: R,
    file_size: u64,
    pipe: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    chunk_size: usize,
) -> Result<Fed, UploadError>
where
    R: AsyncRead + Unpin,
{
    if !forward(&pipe, &cancel, preamble).await {
        return Ok(Fed::Interrupted);
    }

    let mut buf = vec![0u8; chunk_size];
    let mut streamed = 0u64;
    let mut failure = None;
    let mut overrun = false;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Fed::Interrupted),
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                streamed += n as u64;
                // Bytes past the declared size would break the content-length; stop instead.
                if streamed > file_size {
                    overrun = true;
                    break;
                }
                if !forward(&pipe, &cancel, buf[..n].to_vec()).await {
                    return Ok(Fed::Interrupted);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // The trailer goes out even after a failed read so the request terminates.
    let delivered = forward(&pipe, &cancel, trailer).await;
    drop(pipe);

    match failure {
        Some(source) => Err(UploadError::SourceRead { streamed, source }),
        None if overrun => Err(UploadError::SizeMismatch {
            declared: file_size,
            streamed,
        }),
        None if delivered => Ok(Fed::Complete { streamed }),
        None => Ok(Fed::Interrupted),
    }
}

/// Returns false once the consumer is gone or the upload was cancelled.
async fn forward(pipe: &mpsc::Sender<Vec<u8>>, cancel: &CancellationToken, chunk: Vec<u8>) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = pipe.send(chunk) => sent.is_ok(),
    }
}

fn drain_pipe(
    mut pipe: mpsc::Receiver<Vec<u8>>,
    total_bytes: u64,
    progress: Option<mpsc::Sender<UploadProgress>>,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    async_stream::stream! {
        let mut bytes_sent = 0u64;
        while let Some(chunk) = pipe.recv().await {
            bytes_sent += chunk.len() as u64;
            if let Some(progress) = &progress {
                let _ = progress.try_send(UploadProgress {
                    bytes_sent,
                    total_bytes,
                });
            }
            yield Ok::<_, io::Error>(chunk);
        }
    }
}
