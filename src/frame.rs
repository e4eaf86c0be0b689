//! Multipart framing for streamed uploads.
//!
//! A [`MultipartFrame`] holds every byte of a `multipart/form-data` body except the file
//! payload itself: the `preamble` (auxiliary field plus the opened file part headers) and the
//! `trailer` (the closing delimiter). The payload is streamed between the two, so the exact
//! request length is known before a single byte of the file has been read.

use uuid::Uuid;

use crate::error::UploadError;

/// Name of the auxiliary form field carrying the random upload key.
pub const UPLOAD_KEY_FIELD: &str = "u_key";

const FILE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFrame {
    pub preamble: Vec<u8>,
    pub trailer: Vec<u8>,
    pub boundary: String,
}

impl MultipartFrame {
    /// Frames an upload of `file_name` under `file_field`, with `field_token` as the upload key.
    pub fn build(
        field_token: &str,
        file_field: &str,
        file_name: &str,
    ) -> Result<Self, UploadError> {
        Self::with_boundary(random_boundary(), field_token, file_field, file_name)
    }

    pub fn with_boundary(
        boundary: String,
        field_token: &str,
        file_field: &str,
        file_name: &str,
    ) -> Result<Self, UploadError> {
        let mut writer = FormWriter::new(boundary)?;
        writer.write_field(UPLOAD_KEY_FIELD, field_token)?;
        writer.create_form_file(file_field, file_name)?;

        let preamble = writer.take();
        writer.close();
        let trailer = writer.take();

        Ok(Self {
            preamble,
            trailer,
            boundary: writer.boundary,
        })
    }

    /// Value for the outbound `content-type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact body length once `file_size` payload bytes sit between preamble and trailer.
    pub fn content_length(&self, file_size: u64) -> u64 {
        self.preamble.len() as u64 + file_size + self.trailer.len() as u64
    }
}

fn random_boundary() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Minimal `multipart/form-data` writer over an in-memory buffer.
///
/// Parts are only ever opened; the caller owns writing their bodies. Header values are
/// quoted with backslash escaping for `\` and `"`.
struct FormWriter {
    buf: Vec<u8>,
    boundary: String,
    has_parts: bool,
}

impl FormWriter {
    fn new(boundary: String) -> Result<Self, UploadError> {
        let valid = !boundary.is_empty()
            && boundary.len() <= 70
            && boundary
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=?".contains(&b));
        if !valid {
            return Err(UploadError::Frame(format!("invalid boundary {boundary:?}")));
        }

        Ok(Self {
            buf: Vec::new(),
            boundary,
            has_parts: false,
        })
    }

    fn write_field(&mut self, name: &str, value: &str) -> Result<(), UploadError> {
        let disposition = format!("form-data; name=\"{}\"", escape_quotes(name));
        self.create_part(&[("Content-Disposition", disposition)], name)?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn create_form_file(&mut self, field: &str, file_name: &str) -> Result<(), UploadError> {
        check_header_value("file name", file_name)?;
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quotes(field),
            escape_quotes(file_name)
        );
        self.create_part(
            &[
                ("Content-Disposition", disposition),
                ("Content-Type", FILE_CONTENT_TYPE.to_string()),
            ],
            field,
        )
    }

    fn create_part(&mut self, headers: &[(&str, String)], name: &str) -> Result<(), UploadError> {
        if name.is_empty() {
            return Err(UploadError::Frame("empty field name".to_string()));
        }
        check_header_value("field name", name)?;

        if self.has_parts {
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        for (key, value) in headers {
            self.buf
                .extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        self.buf.extend_from_slice(b"\r\n");
        self.has_parts = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.has_parts {
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// Line breaks would terminate the header early and let the value inject headers.
fn check_header_value(what: &str, value: &str) -> Result<(), UploadError> {
    if value.contains(['\r', '\n']) {
        return Err(UploadError::Frame(format!(
            "{what} {value:?} contains a line break"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_are_exact() {
        let frame =
            MultipartFrame::with_boundary("b0undary".to_string(), "tok", "files[]", "a.txt")
                .unwrap();

        let preamble = "--b0undary\r\n\
            Content-Disposition: form-data; name=\"u_key\"\r\n\
            \r\n\
            tok\r\n\
            --b0undary\r\n\
            Content-Disposition: form-data; name=\"files[]\"; filename=\"a.txt\"\r\n\
            Content-Type: application/octet-stream\r\n\
            \r\n";
        assert_eq!(String::from_utf8(frame.preamble.clone()).unwrap(), preamble);
        assert_eq!(frame.trailer, b"\r\n--b0undary--\r\n");
        assert_eq!(frame.content_type(), "multipart/form-data; boundary=b0undary");
    }

    #[test]
    fn test_content_length_adds_payload() {
        let frame = MultipartFrame::build("tok", "files[]", "a.txt").unwrap();
        let framing = (frame.preamble.len() + frame.trailer.len()) as u64;

        assert_eq!(frame.content_length(0), framing);
        assert_eq!(frame.content_length(11), framing + 11);
    }

    #[test]
    fn test_boundaries_are_random_and_absent_from_headers() {
        let a = MultipartFrame::build("tok", "files[]", "a.txt").unwrap();
        let b = MultipartFrame::build("tok", "files[]", "a.txt").unwrap();
        assert_ne!(a.boundary, b.boundary);
        assert_eq!(a.boundary.len(), 32);

        let preamble = String::from_utf8(a.preamble).unwrap();
        // Each delimiter line is the only place the boundary appears.
        assert_eq!(preamble.matches(&a.boundary).count(), 2);
    }

    #[test]
    fn test_file_name_quotes_are_escaped() {
        let frame = MultipartFrame::with_boundary(
            "xyz".to_string(),
            "tok",
            "files[]",
            r#"my "best" \ file.txt"#,
        )
        .unwrap();
        let preamble = String::from_utf8(frame.preamble).unwrap();

        assert!(preamble.contains(r#"filename="my \"best\" \\ file.txt""#));
    }

    #[test]
    fn test_line_breaks_are_rejected() {
        let err = MultipartFrame::build("tok", "files[]", "evil\r\nX-Injected: 1").unwrap_err();
        assert!(matches!(err, UploadError::Frame(_)));

        let err = MultipartFrame::build("tok", "fi\nles", "a.txt").unwrap_err();
        assert!(matches!(err, UploadError::Frame(_)));
    }

    #[test]
    fn test_empty_field_name_is_rejected() {
        let err = MultipartFrame::build("tok", "", "a.txt").unwrap_err();
        assert!(matches!(err, UploadError::Frame(_)));
    }

    #[test]
    fn test_invalid_boundary_is_rejected() {
        let err = MultipartFrame::with_boundary("has space".to_string(), "tok", "f", "a")
            .unwrap_err();
        assert!(matches!(err, UploadError::Frame(_)));
    }
}
