use bytes::Bytes;

/// Outbound request as handed over by the interception engine's hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Inbound response, paired with the path of the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub request_path: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Rewritten bodies change length; the framing header must follow.
pub fn set_content_length(headers: &mut Vec<(String, String)>, length: usize) {
    for (name, value) in headers.iter_mut() {
        if name.eq_ignore_ascii_case("content-length") {
            *value = length.to_string();
            return;
        }
    }
    headers.push(("Content-Length".to_string(), length.to_string()));
}

#[cfg(test)]
mod tests {
    use super::{header_value, set_content_length};

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        assert_eq!(header_value(&headers, "content-type"), Some("application/json"));
        assert_eq!(header_value(&headers, "host"), None);
    }

    #[test]
    fn content_length_is_replaced_or_appended() {
        let mut headers = vec![("content-length".to_string(), "2".to_string())];
        set_content_length(&mut headers, 17);
        assert_eq!(headers[0].1, "17");

        let mut empty = Vec::new();
        set_content_length(&mut empty, 4);
        assert_eq!(empty, vec![("Content-Length".to_string(), "4".to_string())]);
    }
}
