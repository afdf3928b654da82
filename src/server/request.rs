//! Multipart form parsing ahead of dispatch.

use bytes::Bytes;
use futures_util::stream;
use multer::Multipart;

use crate::core::params::ParamList;

/// Whether `content_type` is `multipart/form-data`.
pub fn is_multipart(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("multipart/form-data"))
}

/// Text fields of a `multipart/form-data` body, in order.
///
/// File parts are skipped; uploads are not part of request data.
pub async fn parse_form_fields(content_type: &str, body: Bytes) -> Result<ParamList, String> {
    let boundary = multer::parse_boundary(content_type).map_err(|e| e.to_string())?;
    let mut multipart = Multipart::new(
        stream::once(async { Ok::<_, std::io::Error>(body) }),
        boundary,
    );

    let mut fields = ParamList::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if field.file_name().is_some() {
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(|e| e.to_string())?;
        fields.push((name, value));
    }

    tracing::debug!(fields = fields.len(), "parsed multipart form");
    Ok(fields)
}
