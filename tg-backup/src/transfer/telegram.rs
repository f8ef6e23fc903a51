//! Delivers the archive through the Bot API `sendDocument` method.
//!
//! The multipart body is produced by a spawned task writing into one end of
//! an in-memory duplex pipe while the HTTP client streams the other end to
//! the server. The pipe is bounded, so a slow upload suspends the encoder
//! instead of buffering the archive.

use super::multipart::{encoded_len, MultipartWriter};
use super::progress::{format_bytes, format_duration, DEFAULT_REPORT_INTERVAL};
use super::progress_reader::{log_progress, ProgressCallback, ProgressReader};
use crate::config::TelegramConfig;
use crate::utils::errors::UploadError;
use crate::utils::Secret;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::error::Error as StdError;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Capacity of the pipe between encoder and HTTP body
const PIPE_CAPACITY: usize = 256 * 1024;

/// Read size when copying the file into the pipe
const CHUNK_SIZE: usize = 64 * 1024;

const CHAT_ID_FIELD: &str = "chat_id";
const DOCUMENT_FIELD: &str = "document";

/// Which side of the encoder failed
#[derive(Debug)]
enum EncodeError {
    /// Reading the archive
    Source(io::Error),
    /// Writing into the pipe; usually the HTTP side went away first
    Sink(io::Error),
}

/// Uploads files to one chat.
pub struct TelegramUploader {
    client: reqwest::Client,
    api_url: String,
    token: Secret,
    chat_id: String,
    report_interval: Duration,
    progress_callback: Option<ProgressCallback>,
}

impl TelegramUploader {
    pub fn new(config: &TelegramConfig) -> Result<Self, UploadError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if config.insecure_skip_verify {
            warn!(
                "TLS certificate verification is DISABLED for uploads \
                 (telegram.insecure_skip_verify = true)"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| UploadError::Transport(describe_http_error(e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            progress_callback: None,
        })
    }

    /// Replace the default logging progress callback
    pub fn with_progress(mut self, interval: Duration, callback: ProgressCallback) -> Self {
        self.report_interval = interval;
        self.progress_callback = Some(callback);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendDocument", self.api_url, self.token.expose())
    }

    /// Send `file_path` as a document. Returns once the server answered and
    /// the encoder task has been joined.
    pub async fn upload(&self, file_path: &Path) -> Result<(), UploadError> {
        let started = Instant::now();
        let file = tokio::fs::File::open(file_path)
            .await
            .map_err(|e| local_failure("failed to open", file_path, e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| local_failure("failed to stat", file_path, e))?
            .len();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UploadError::Transport(format!("{} has no file name", file_path.display()))
            })?;

        info!(
            file = %file_path.display(),
            size = %format_bytes(total),
            "Uploading archive"
        );

        let callback = self
            .progress_callback
            .clone()
            .unwrap_or_else(|| log_progress(file_name.clone()));
        let source = ProgressReader::new(file, total, self.report_interval, callback);

        let (pipe_writer, pipe_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let form = MultipartWriter::new(pipe_writer);
        let content_type = form.content_type();
        let content_length = encoded_len(
            form.boundary(),
            &[(CHAT_ID_FIELD, self.chat_id.as_str())],
            (DOCUMENT_FIELD, file_name.as_str()),
            total,
        );

        let mut producer = tokio::spawn(encode_form(
            form,
            self.chat_id.clone(),
            file_name,
            source,
            total,
        ));

        let response = self
            .client
            .post(self.endpoint())
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(pipe_reader)))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // The request body was dropped with the failed request, so the
                // encoder stops on its next write.
                let produced = join_encoder(&mut producer).await;
                if let Err(EncodeError::Source(source)) = produced {
                    return Err(local_failure("failed to read", file_path, source));
                }
                return Err(UploadError::Transport(describe_http_error(e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => format!("<unreadable response body: {}>", describe_http_error(e)),
            };
            producer.abort();
            if let Err(e) = join_encoder(&mut producer).await {
                debug!(error = ?e, "Encoder stopped after rejection");
            }
            return Err(UploadError::RemoteRejection {
                status: status.as_u16(),
                body,
            });
        }

        let produced = join_encoder(&mut producer).await;
        let reply = response.text().await.unwrap_or_default();
        match produced {
            Ok(sent) => {
                debug!(reply = %reply, "Bot API reply");
                info!(
                    bytes = sent,
                    elapsed = %format_duration(started.elapsed().as_secs()),
                    "Upload complete"
                );
                Ok(())
            }
            Err(EncodeError::Source(e)) => Err(local_failure("failed to read", file_path, e)),
            Err(EncodeError::Sink(e)) => Err(UploadError::Transport(format!(
                "request body was cut short: {e}"
            ))),
        }
    }
}

/// Drive the multipart encoder into the pipe. Returns the number of file
/// bytes written.
async fn encode_form<W, R>(
    mut form: MultipartWriter<W>,
    chat_id: String,
    file_name: String,
    source: R,
    total: u64,
) -> Result<u64, EncodeError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    form.write_field(CHAT_ID_FIELD, &chat_id)
        .await
        .map_err(EncodeError::Sink)?;
    form.begin_file(DOCUMENT_FIELD, &file_name)
        .await
        .map_err(EncodeError::Sink)?;

    // The declared content length covers exactly `total` file bytes.
    let mut source = source.take(total);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = source.read(&mut buf).await.map_err(EncodeError::Source)?;
        if n == 0 {
            break;
        }
        form.write_chunk(&buf[..n]).await.map_err(EncodeError::Sink)?;
        sent += n as u64;
    }

    if sent != total {
        return Err(EncodeError::Source(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file shrank during upload: read {sent} of {total} bytes"),
        )));
    }

    form.end_part().await.map_err(EncodeError::Sink)?;
    let mut pipe = form.finish().await.map_err(EncodeError::Sink)?;
    pipe.shutdown().await.map_err(EncodeError::Sink)?;
    Ok(sent)
}

async fn join_encoder(
    producer: &mut tokio::task::JoinHandle<Result<u64, EncodeError>>,
) -> Result<u64, EncodeError> {
    match producer.await {
        Ok(result) => result,
        Err(e) => Err(EncodeError::Sink(io::Error::other(e))),
    }
}

fn local_failure(action: &str, path: &Path, err: io::Error) -> UploadError {
    UploadError::Transport(format!("{} {}: {}", action, path.display(), err))
}

/// Render a reqwest error with its causes but without the request URL, which
/// embeds the bot token.
fn describe_http_error(err: reqwest::Error) -> String {
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
