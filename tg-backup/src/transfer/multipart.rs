//! Streaming `multipart/form-data` encoder.
//!
//! Parts are written straight to an `AsyncWrite`, so a file part never has to
//! be held in memory. Because every framing string is known up front, the
//! exact body length can be computed before any byte is written.

use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Writes a multipart body part by part.
pub struct MultipartWriter<W> {
    inner: W,
    boundary: String,
}

impl<W> MultipartWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self::with_boundary(inner, generate_boundary())
    }

    pub fn with_boundary(inner: W, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Write a complete text field
    pub async fn write_field(&mut self, name: &str, value: &str) -> io::Result<()> {
        self.inner
            .write_all(field_head(&self.boundary, name).as_bytes())
            .await?;
        self.inner.write_all(value.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await
    }

    /// Start a file part; follow with `write_chunk` calls and `end_part`
    pub async fn begin_file(&mut self, name: &str, filename: &str) -> io::Result<()> {
        self.inner
            .write_all(file_head(&self.boundary, name, filename).as_bytes())
            .await
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.inner.write_all(chunk).await
    }

    pub async fn end_part(&mut self) -> io::Result<()> {
        self.inner.write_all(b"\r\n").await
    }

    /// Write the closing boundary, flush, and hand back the writer
    pub async fn finish(mut self) -> io::Result<W> {
        self.inner
            .write_all(closing(&self.boundary).as_bytes())
            .await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

/// Exact length of a body holding text `fields` followed by one file part of
/// `file_len` bytes.
pub fn encoded_len(boundary: &str, fields: &[(&str, &str)], file: (&str, &str), file_len: u64) -> u64 {
    let fields_len: usize = fields
        .iter()
        .map(|(name, value)| field_head(boundary, name).len() + value.len() + 2)
        .sum();
    let file_head_len = file_head(boundary, file.0, file.1).len();

    (fields_len + file_head_len + 2 + closing(boundary).len()) as u64 + file_len
}

fn generate_boundary() -> String {
    format!("tg-backup-{}", Uuid::new_v4().simple())
}

fn field_head(boundary: &str, name: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
        boundary,
        escape_quoted(name)
    )
}

fn file_head(boundary: &str, name: &str, filename: &str) -> String {
    format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        boundary,
        escape_quoted(name),
        escape_quoted(filename)
    )
}

fn closing(boundary: &str) -> String {
    format!("--{}--\r\n", boundary)
}

/// Percent-encode the characters that would break a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
