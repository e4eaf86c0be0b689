use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub file_key: String,
    #[serde(default)]
    pub delete_url: String,
}
