use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::errors::RewriteError;

/// Body encodings the governed API uses. Anything with `json` in the content
/// type is JSON; every other declared content type is treated as a URL-encoded
/// form, which is what the PC SDK actually sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyEncoding {
    Json,
    Form,
}

pub(crate) fn detect(content_type: Option<&str>) -> Result<BodyEncoding, RewriteError> {
    let Some(content_type) = content_type else {
        return Err(RewriteError::UnsupportedEncoding(
            "request carries no content type".to_string(),
        ));
    };
    if content_type.to_ascii_lowercase().contains("json") {
        Ok(BodyEncoding::Json)
    } else {
        Ok(BodyEncoding::Form)
    }
}

/// Parses the body into a flat JSON object map. Form fields become string
/// values so they re-serialize exactly as they arrived.
pub(crate) fn parse(encoding: BodyEncoding, body: &[u8]) -> Result<Map<String, Value>, RewriteError> {
    match encoding {
        BodyEncoding::Json => {
            let value: Value = serde_json::from_slice(body)
                .map_err(|error| RewriteError::Parse(error.to_string()))?;
            match value {
                Value::Object(map) => Ok(map),
                other => Err(RewriteError::Shape(format!(
                    "expected a JSON object, got {other}"
                ))),
            }
        }
        BodyEncoding::Form => {
            let mut map = Map::new();
            for (key, value) in form_urlencoded::parse(body).into_owned() {
                map.insert(key, Value::String(value));
            }
            Ok(map)
        }
    }
}

/// Re-serializes the map in its original encoding; JSON stays JSON, form
/// stays form.
pub(crate) fn serialize(
    encoding: BodyEncoding,
    fields: &Map<String, Value>,
) -> Result<Vec<u8>, RewriteError> {
    match encoding {
        BodyEncoding::Json => serde_json::to_vec(&Value::Object(fields.clone()))
            .map_err(|error| RewriteError::Parse(error.to_string())),
        BodyEncoding::Form => {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, value) in fields {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                serializer.append_pair(key, &rendered);
            }
            Ok(serializer.finish().into_bytes())
        }
    }
}
