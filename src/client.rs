use std::{fmt, time::Duration};

use reqwest::Client;
use tokio::{io::AsyncRead, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::error::UploadError;
use crate::rest_types::UploadResponse;
use crate::token::{UPLOAD_KEY_LENGTH, random_token};
use crate::transport::{
    self, DEFAULT_CHUNK_SIZE, TransportOptions, UploadProgress, UploadRequest,
};

pub const DEFAULT_BASE_URL: &str = "https://bitsend.jp/";

const UPLOAD_ROUTE: &str = "jqu/";
const FILE_FIELD: &str = "files[]";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Site root, used for the referer header and for download links.
    pub base_url: Url,
    /// Overrides `<base_url>/jqu/`.
    pub upload_url: Option<Url>,
    pub timeout: Option<Duration>,
    pub chunk_size: usize,
    pub debug: bool,
}

impl Settings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            upload_url: None,
            timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            debug: false,
        }
    }
}

/// Links for a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLinks {
    pub download: Url,
    pub delete: String,
}

impl UploadLinks {
    pub fn print(&self) {
        println!("{self}");
    }
}

impl fmt::Display for UploadLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Download Link: {}\nDelete Link: {}",
            self.download, self.delete
        )
    }
}

pub struct BitSend {
    client: Client,
    base_url: Url,
    options: TransportOptions,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<UploadProgress>>,
    resp: UploadResponse,
}

impl BitSend {
    pub fn new(settings: Settings) -> Result<Self, UploadError> {
        let endpoint = match settings.upload_url {
            Some(url) => url,
            None => settings.base_url.join(UPLOAD_ROUTE)?,
        };

        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }

        let mut options = TransportOptions::new(endpoint, FILE_FIELD);
        options.referer = Some(settings.base_url.to_string());
        options.chunk_size = settings.chunk_size;
        options.debug = settings.debug;

        Ok(Self {
            client: builder.build()?,
            base_url: settings.base_url,
            options,
            cancel: CancellationToken::new(),
            progress: None,
            resp: UploadResponse::default(),
        })
    }

    /// Reports every body chunk handed to the transport.
    pub fn with_progress(mut self, progress: mpsc::Sender<UploadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.options.endpoint
    }

    /// Uploads `file`, which must yield exactly `size` bytes, and keeps the parsed response
    /// for [`BitSend::post_upload`].
    pub async fn do_upload<R>(&mut self, name: &str, size: u64, file: R) -> Result<(), UploadError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let request = UploadRequest {
            file_name: name.to_string(),
            file_size: size,
            file_reader: file,
            field_token: random_token(UPLOAD_KEY_LENGTH),
        };

        let body = transport::upload(
            &self.client,
            &self.options,
            request,
            &self.cancel,
            self.progress.clone(),
        )
        .await?;

        self.resp = serde_json::from_slice(&body)?;
        Ok(())
    }

    /// Links for the first file of the last successful upload.
    pub fn post_upload(&self) -> Result<UploadLinks, UploadError> {
        let file = self.resp.files.first().ok_or(UploadError::EmptyResponse)?;
        if self.options.debug {
            info!("{:?}", self.resp);
        }

        Ok(UploadLinks {
            download: self.download_url(&file.file_key)?,
            delete: file.delete_url.clone(),
        })
    }

    pub fn download_url(&self, file_key: &str) -> Result<Url, UploadError> {
        Ok(self.base_url.join(&format!("download/{file_key}.html"))?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn default_base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    async fn mock_bitsend(body: &str) -> (MockServer, BitSend) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jqu/"))
            .and(header("referer", DEFAULT_BASE_URL))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = Settings::new(default_base());
        settings.upload_url = Some(Url::parse(&format!("{}/jqu/", server.uri())).unwrap());
        let bitsend = BitSend::new(settings).unwrap();
        (server, bitsend)
    }

    #[test]
    fn test_default_endpoint() {
        let bitsend = BitSend::new(Settings::new(default_base())).unwrap();
        assert_eq!(bitsend.endpoint().as_str(), "https://bitsend.jp/jqu/");
    }

    #[test]
    fn test_post_upload_before_upload_is_empty() {
        let bitsend = BitSend::new(Settings::new(default_base())).unwrap();
        assert!(matches!(
            bitsend.post_upload(),
            Err(UploadError::EmptyResponse)
        ));
    }

    #[test]
    fn test_download_url() {
        let bitsend = BitSend::new(Settings::new(default_base())).unwrap();
        assert_eq!(
            bitsend.download_url("abc123").unwrap().as_str(),
            "https://bitsend.jp/download/abc123.html"
        );
    }

    #[tokio::test]
    async fn test_upload_then_links() {
        let (_server, mut bitsend) = mock_bitsend(
            r#"{"files":[{"file_key":"abc123","delete_url":"https://x/del/1"}]}"#,
        )
        .await;

        bitsend
            .do_upload("a.txt", 11, Cursor::new(b"hello world".to_vec()))
            .await
            .unwrap();
        let links = bitsend.post_upload().unwrap();

        assert_eq!(
            links.download.as_str(),
            "https://bitsend.jp/download/abc123.html"
        );
        assert_eq!(links.delete, "https://x/del/1");
        assert_eq!(
            links.to_string(),
            "Download Link: https://bitsend.jp/download/abc123.html\nDelete Link: https://x/del/1"
        );
    }

    #[tokio::test]
    async fn test_response_without_files() {
        let (_server, mut bitsend) = mock_bitsend(r#"{"files":[]}"#).await;

        bitsend
            .do_upload("a.txt", 11, Cursor::new(b"hello world".to_vec()))
            .await
            .unwrap();

        assert!(matches!(
            bitsend.post_upload(),
            Err(UploadError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_decode_error() {
        let (_server, mut bitsend) = mock_bitsend("<html>busy</html>").await;

        let err = bitsend
            .do_upload("a.txt", 11, Cursor::new(b"hello world".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Decode(_)));
    }
}
