//! Request body decoding: JSON, `multipart/form-data` and url-encoded forms.
//!
//! The decoder is selected by the request's `Content-Type` header:
//!
//! | Content type            | Result                                          |
//! |-------------------------|-------------------------------------------------|
//! | `application/json*`     | parsed JSON; an object also becomes the form    |
//! | `multipart/form-data*`  | form fields + [`PostedFile`] uploads            |
//! | anything else / absent  | `application/x-www-form-urlencoded` form fields |

use std::collections::HashMap;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::Parameters;

/// Content type given to uploads that do not declare one.
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

static BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i);\s*boundary\s*=\s*"?([^";\s]+)"?"#).expect("boundary pattern is valid")
});
static PART_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)content-disposition:[^\r\n]*?\bname="([^"]+)""#)
        .expect("part name pattern is valid")
});
static PART_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)content-disposition:[^\r\n]*?\bfilename="([^"]+)""#)
        .expect("part filename pattern is valid")
});
static PART_CONTENT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)content-type\s*:\s*(\S+)").expect("part content type pattern is valid")
});

/// Errors raised while decoding a request body.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON body: {0}")]
    BodyParse(#[from] serde_json::Error),

    #[error("multipart/form-data content type has no boundary parameter")]
    MissingBoundary,

    #[error("multipart part #{index} has no content-disposition name")]
    MissingPartName { index: usize },
}

/// A file uploaded through a `multipart/form-data` part carrying a `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedFile {
    file_name: String,
    content_type: String,
    data: Bytes,
}

impl PostedFile {
    pub fn new(file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: DEFAULT_FILE_CONTENT_TYPE.to_owned(),
            data,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Structured result of decoding one request body.
#[derive(Debug, Default)]
pub struct DecodedBody {
    pub form: Parameters,
    pub json: Option<Value>,
    pub files: HashMap<String, PostedFile>,
}

/// Decodes `body` according to `content_type`.
pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<DecodedBody, DecodeError> {
    let lowered = content_type.map(str::to_ascii_lowercase).unwrap_or_default();

    if lowered.starts_with("application/json") {
        let value: Value = serde_json::from_slice(body)?;
        let form = match &value {
            Value::Object(map) => Parameters::from(map.clone()),
            _ => Parameters::new(),
        };
        return Ok(DecodedBody {
            form,
            json: Some(value),
            files: HashMap::new(),
        });
    }

    if lowered.starts_with("multipart/form-data") {
        let boundary = content_type
            .and_then(|ct| BOUNDARY.captures(ct))
            .map(|caps| caps[1].to_owned())
            .ok_or(DecodeError::MissingBoundary)?;
        return decode_multipart(&boundary, body);
    }

    Ok(DecodedBody {
        form: Parameters::from_urlencoded(body),
        ..DecodedBody::default()
    })
}

/// Splits a multipart body on `--boundary` delimiters and decodes each part.
///
/// Field values are re-encoded into a form-urlencoded accumulator that is
/// parsed in a single pass once every part has been read, so repeated field
/// names collect into arrays exactly like an url-encoded body would.
pub fn decode_multipart(boundary: &str, body: &[u8]) -> Result<DecodedBody, DecodeError> {
    let mut fields = url::form_urlencoded::Serializer::new(String::new());
    let mut files = HashMap::new();

    for (index, part) in split_parts(boundary.as_bytes(), body).into_iter().enumerate() {
        let (head, content) = match find(part, b"\r\n\r\n") {
            Some(pos) => (&part[..pos], &part[pos + 4..]),
            None => (part, &part[part.len()..]),
        };
        let head = String::from_utf8_lossy(head);

        let name = PART_NAME
            .captures(&head)
            .map(|caps| caps[1].to_owned())
            .ok_or(DecodeError::MissingPartName { index })?;

        match PART_FILENAME.captures(&head) {
            Some(caps) => {
                let mut file = PostedFile::new(&caps[1], Bytes::copy_from_slice(content));
                if let Some(ct) = PART_CONTENT_TYPE.captures(&head) {
                    file = file.with_content_type(&ct[1]);
                }
                files.insert(name, file);
            }
            None => {
                fields.append_pair(&name, &String::from_utf8_lossy(content));
            }
        }
    }

    Ok(DecodedBody {
        form: Parameters::from_urlencoded(fields.finish().as_bytes()),
        json: None,
        files,
    })
}

// Returns the raw bytes of each part, without the delimiter lines.
fn split_parts<'a>(boundary: &[u8], body: &'a [u8]) -> Vec<&'a [u8]> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 4);
    delimiter.extend_from_slice(b"\r\n--");
    delimiter.extend_from_slice(boundary);
    // The opening delimiter is not preceded by CRLF unless there is a preamble.
    let opening = &delimiter[2..];

    let mut parts = Vec::new();
    let Some(start) = find(body, opening) else {
        return parts;
    };
    let mut rest = &body[start + opening.len()..];

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        rest = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        match find(rest, &delimiter) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = &rest[end + delimiter.len()..];
            }
            None => {
                // Unterminated body: keep what is left as a final part.
                if !rest.is_empty() {
                    parts.push(rest);
                }
                break;
            }
        }
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CT: &str = "multipart/form-data; boundary=----XyZ42";

    fn multipart(parts: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for part in parts {
            body.push_str("------XyZ42\r\n");
            body.push_str(part);
            body.push_str("\r\n");
        }
        body.push_str("------XyZ42--\r\n");
        body.into_bytes()
    }

    #[test]
    fn field_and_file_parts() {
        let body = multipart(&[
            "Content-Disposition: form-data; name=\"name\"\r\n\r\nbar",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\r\nhello",
        ]);
        let decoded = decode(Some(CT), &body).unwrap();

        assert_eq!(decoded.form.get_str("name"), Some("bar"));
        assert_eq!(decoded.form.len(), 1);

        let file = &decoded.files["upload"];
        assert_eq!(file.file_name(), "a.txt");
        assert_eq!(file.content_type(), DEFAULT_FILE_CONTENT_TYPE);
        assert_eq!(file.data().as_ref(), b"hello");
        assert_eq!(file.size(), 5);
    }

    #[test]
    fn part_content_type_is_used_for_files() {
        let body = multipart(&[
            "Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n\x01\x02",
        ]);
        let decoded = decode(Some(CT), &body).unwrap();
        assert_eq!(decoded.files["avatar"].content_type(), "image/png");
    }

    #[test]
    fn binary_file_payload_is_preserved() {
        let mut body = b"------XyZ42\r\nContent-Disposition: form-data; name=\"bin\"; filename=\"b.bin\"\r\n\r\n".to_vec();
        body.extend_from_slice(&[0xff, 0x00, 0xfe, b'\r', b'\n', 0x80]);
        body.extend_from_slice(b"\r\n------XyZ42--\r\n");

        let decoded = decode(Some(CT), &body).unwrap();
        assert_eq!(
            decoded.files["bin"].data().as_ref(),
            &[0xff, 0x00, 0xfe, b'\r', b'\n', 0x80]
        );
    }

    #[test]
    fn field_values_with_separators_survive_reencoding() {
        let body = multipart(&[
            "Content-Disposition: form-data; name=\"q\"\r\n\r\na=1&b=2 + c",
            "Content-Disposition: form-data; name=\"tag\"\r\n\r\nx",
            "Content-Disposition: form-data; name=\"tag\"\r\n\r\ny",
        ]);
        let decoded = decode(Some(CT), &body).unwrap();
        assert_eq!(decoded.form.get_str("q"), Some("a=1&b=2 + c"));
        assert_eq!(decoded.form.get("tag"), Some(&json!(["x", "y"])));
    }

    #[test]
    fn filename_before_name_is_not_confused() {
        let body = multipart(&[
            "Content-Disposition: form-data; filename=\"doc.pdf\"; name=\"doc\"\r\n\r\n%PDF",
        ]);
        let decoded = decode(Some(CT), &body).unwrap();
        assert_eq!(decoded.files["doc"].file_name(), "doc.pdf");
    }

    #[test]
    fn quoted_boundary() {
        let body = multipart(&["Content-Disposition: form-data; name=\"a\"\r\n\r\n1"]);
        let decoded = decode(Some("multipart/form-data; boundary=\"----XyZ42\""), &body).unwrap();
        assert_eq!(decoded.form.get_str("a"), Some("1"));
    }

    #[test]
    fn missing_boundary() {
        let err = decode(Some("multipart/form-data"), b"whatever").unwrap_err();
        assert!(matches!(err, DecodeError::MissingBoundary));
    }

    #[test]
    fn missing_part_name() {
        let body = multipart(&["Content-Disposition: form-data\r\n\r\nvalue"]);
        let err = decode(Some(CT), &body).unwrap_err();
        assert!(matches!(err, DecodeError::MissingPartName { index: 0 }));
    }

    #[test]
    fn json_object_becomes_form() {
        let decoded = decode(
            Some("Application/JSON; charset=utf-8"),
            br#"{"user":{"id":7},"tags":["a"]}"#,
        )
        .unwrap();
        assert_eq!(decoded.form.get("user"), Some(&json!({"id": 7})));
        assert!(decoded.json.is_some());
    }

    #[test]
    fn json_array_is_kept_but_not_a_form() {
        let decoded = decode(Some("application/json"), b"[1,2]").unwrap();
        assert!(decoded.form.is_empty());
        assert_eq!(decoded.json, Some(json!([1, 2])));
    }

    #[test]
    fn malformed_json() {
        let err = decode(Some("application/json"), b"{\"open\": ").unwrap_err();
        assert!(matches!(err, DecodeError::BodyParse(_)));
    }

    #[test]
    fn urlencoded_is_the_fallback() {
        let decoded = decode(None, b"a=1&b=two+words").unwrap();
        assert_eq!(decoded.form.get_str("a"), Some("1"));
        assert_eq!(decoded.form.get_str("b"), Some("two words"));

        let decoded = decode(Some("text/plain"), b"x=y").unwrap();
        assert_eq!(decoded.form.get_str("x"), Some("y"));
    }
}
