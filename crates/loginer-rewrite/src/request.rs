use bytes::Bytes;
use serde_json::Value;

use crate::body;
use crate::constants::CLIENT_VERSION;
use crate::errors::RewriteError;
use crate::types::{header_value, set_content_length, InterceptedRequest};

/// Injects the fixed `cv` client-version field and drops the `arch` field
/// from a governed request body, preserving the original encoding.
///
/// Only POST bodies carry these fields; other methods pass through untouched.
/// The backend rejects logins without `cv`, and refuses bodies that still
/// carry the desktop `arch` marker.
pub(crate) fn inject_client_version(request: &mut InterceptedRequest) -> Result<(), RewriteError> {
    if request.method != "POST" {
        return Ok(());
    }

    let encoding = body::detect(header_value(&request.headers, "content-type"))?;
    let mut fields = body::parse(encoding, &request.body)?;
    fields.insert(
        "cv".to_string(),
        Value::String(CLIENT_VERSION.to_string()),
    );
    fields.remove("arch");

    let rewritten = body::serialize(encoding, &fields)?;
    set_content_length(&mut request.headers, rewritten.len());
    request.body = Bytes::from(rewritten);
    Ok(())
}
