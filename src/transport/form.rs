//! Whole-file form transport

use super::binary::FRAME_SIZE;
use super::{
    build_client, method, ProgressFn, SendRequest, Transport, TransportError, TransportKind,
    TransportResponse,
};
use crate::config::RequestConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Body;

/// Submits each file as a single multipart form.
///
/// Custom headers are not sent and progress is not reported. Responses may
/// come back wrapped in `<pre>` by servers answering a form post with HTML.
pub struct FormTransport {
    config: RequestConfig,
    client: reqwest::Client,
}

impl FormTransport {
    pub fn new(config: RequestConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

/// Unwrap a `<pre>…</pre>` body
pub fn strip_pre(body: &str) -> &str {
    let trimmed = body.trim();
    if !trimmed
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("<pre"))
    {
        return trimmed;
    }
    let Some(open_end) = trimmed.find('>') else {
        return trimmed;
    };
    let inner = &trimmed[open_end + 1..];
    let close = inner
        .to_ascii_lowercase()
        .rfind("</pre>")
        .unwrap_or(inner.len());
    inner[..close].trim()
}

#[async_trait]
impl Transport for FormTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Form
    }

    fn supports_chunking(&self) -> bool {
        false
    }

    fn supports_abort(&self) -> bool {
        false
    }

    #[tracing::instrument(
        name = "transport.form.send",
        skip(self, request, _progress),
        fields(file_id = %request.file_id, uuid = %request.uuid),
        err
    )]
    async fn send(
        &self,
        request: SendRequest,
        _progress: ProgressFn,
    ) -> Result<TransportResponse, TransportError> {
        if request.chunked {
            return Err(TransportError::InvalidRequest(
                "form transport cannot send chunks".into(),
            ));
        }

        let frames = request
            .source
            .stream_range(request.range.clone(), FRAME_SIZE)
            .await?;
        let len = request.range.end - request.range.start;
        let mut params = request.params.clone();
        params.insert(self.config.uuid_name.clone(), request.uuid.clone());

        let mut builder = self
            .client
            .request(method(&self.config), &request.endpoint);

        let mut form = Form::new();
        if self.config.params_in_body {
            for (name, value) in params {
                form = form.text(name, value);
            }
        } else {
            builder = builder.query(&params);
        }

        let mut part = Part::stream_with_length(Body::wrap_stream(frames), len)
            .file_name(request.source.name().to_string());
        if let Some(content_type) = request.source.content_type() {
            part = part.mime_str(content_type)?;
        }
        form = form.part(self.config.input_name.clone(), part);

        let response = builder.multipart(form).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(TransportResponse {
            status,
            body: strip_pre(&text).to_string(),
        })
    }
}
