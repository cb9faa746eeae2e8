//! Streamed binary transport

use super::{
    build_client, method, ProgressFn, SendRequest, Transport, TransportError, TransportKind,
    TransportResponse,
};
use crate::config::RequestConfig;
use crate::upload::source::ByteStream;
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::Body;

/// Size of the frames the body is streamed in; progress is reported per frame
pub const FRAME_SIZE: usize = 64 * 1024;

/// Multipart file name used for chunks; the real name travels as a parameter
const CHUNK_FILE_NAME: &str = "blob";

pub struct BinaryTransport {
    config: RequestConfig,
    client: reqwest::Client,
}

impl BinaryTransport {
    pub fn new(config: RequestConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    /// Parameters as sent: caller and chunk params, the uuid, and what the
    /// request mode adds
    fn request_params(&self, request: &SendRequest) -> Vec<(String, String)> {
        let mut params = request.params.clone();
        params.insert(self.config.uuid_name.clone(), request.uuid.clone());
        if self.config.multipart() {
            params.insert(
                self.config.total_file_size_name.clone(),
                request.source.size().to_string(),
            );
        }
        if !self.config.params_in_body {
            params.insert(
                self.config.input_name.clone(),
                request.source.name().to_string(),
            );
        }
        params.into_iter().collect()
    }
}

/// Report the running byte count as each frame is pulled by the HTTP client.
fn progress_body(frames: ByteStream, progress: ProgressFn) -> Body {
    let mut sent = 0u64;
    let stream = frames.map(move |frame| {
        if let Ok(frame) = &frame {
            sent += frame.len() as u64;
            progress(sent);
        }
        frame
    });
    Body::wrap_stream(stream)
}

#[async_trait]
impl Transport for BinaryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Binary
    }

    fn supports_chunking(&self) -> bool {
        true
    }

    fn supports_abort(&self) -> bool {
        true
    }

    #[tracing::instrument(
        name = "transport.binary.send",
        skip(self, request, progress),
        fields(
            file_id = %request.file_id,
            uuid = %request.uuid,
            range.start = request.range.start,
            range.end = request.range.end,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn send(
        &self,
        request: SendRequest,
        progress: ProgressFn,
    ) -> Result<TransportResponse, TransportError> {
        let frames = request
            .source
            .stream_range(request.range.clone(), FRAME_SIZE)
            .await?;
        let len = request.range.end - request.range.start;
        let params = self.request_params(&request);

        let mut builder = self
            .client
            .request(method(&self.config), &request.endpoint)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(CACHE_CONTROL, "no-cache");

        if !self.config.params_in_body {
            builder = builder.query(&params);
        }

        let body = progress_body(frames, progress);
        if self.config.multipart() {
            let file_name = if request.chunked {
                CHUNK_FILE_NAME.to_string()
            } else {
                request.source.name().to_string()
            };
            let mut part = Part::stream_with_length(body, len).file_name(file_name);
            if let Some(content_type) = request.source.content_type() {
                part = part.mime_str(content_type)?;
            }

            let mut form = Form::new();
            if self.config.params_in_body {
                for (name, value) in params {
                    form = form.text(name, value);
                }
            }
            builder = builder.multipart(form.part(self.config.input_name.clone(), part));
        } else {
            builder = builder
                .header(CONTENT_TYPE, "application/octet-stream")
                .header("X-Mime-Type", request.source.content_type().unwrap_or(""))
                .body(body);
        }

        for (name, value) in &self.config.custom_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!(bytes = len, "Sending upload request");
        let response = builder.send().await?;
        let status = response.status().as_u16();
        tracing::Span::current().record("http.status_code", status);

        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}
