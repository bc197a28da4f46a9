use axum::{
    body::Body,
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::{
    ToResponse,
    openapi::{
        self, ObjectBuilder, RefOr, ResponseBuilder, content,
        schema::{KnownFormat, SchemaFormat, SchemaType, Type},
    },
};

use crate::domain::FileRecord;

/// Streams a stored file back under its original name.
pub struct FileReply {
    file: File,
    len: u64,
    record: FileRecord,
}

impl FileReply {
    #[must_use]
    pub fn new(file: File, len: u64, record: FileRecord) -> Self {
        Self { file, len, record }
    }

    fn attachment_name(&self) -> String {
        let name = &self.record.original_name;
        let name = match name.rfind(['\\', '/']) {
            Some(ix) => &name[ix + 1..],
            None => name.as_str(),
        };
        // quotes and control characters would break the header
        name.chars()
            .map(|c| if c == '"' || c.is_control() { '_' } else { c })
            .collect()
    }

    /// Plain ASCII name for old clients plus the exact UTF-8 name.
    fn content_disposition(&self) -> String {
        let name = self.attachment_name();
        let fallback: String = name
            .chars()
            .map(|c| if c.is_ascii() { c } else { '_' })
            .collect();
        let encoded = urlencoding::encode(&name);
        format!(r#"attachment; filename="{fallback}"; filename*=UTF-8''{encoded}"#)
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let disposition = self.content_disposition();
        let len = self.len.to_string();
        let stream = ReaderStream::new(self.file);
        let mut res = Body::from_stream(stream).into_response();
        res.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("application/octet-stream"),
        );
        if let Ok(val) = HeaderValue::from_str(disposition.as_str()) {
            res.headers_mut().insert("content-disposition", val);
        }
        if let Ok(val) = HeaderValue::from_str(len.as_str()) {
            res.headers_mut().insert("content-length", val);
        }

        res
    }
}

impl ToResponse<'static> for FileReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(SchemaType::new(Type::String))
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Binary)))
            .build();
        let content = content::Content::new(Some(object));
        (
            "FileReply",
            ResponseBuilder::new()
                .description("File binary content")
                .content("application/octet-stream", content)
                .build()
                .into(),
        )
    }
}
