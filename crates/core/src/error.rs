use reqwest::Response;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures of the hosted model API and of the vector index.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} api key is not configured")]
    MissingApiKey(String),

    #[error("{0} returned an empty embedding")]
    EmptyEmbedding(String),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("backend request failed: {0}")]
    Request(String),
}

/// Passes a 2xx response through; otherwise reads the body into a
/// `BackendResponse` error tagged with `backend`.
pub(crate) async fn ensure_success(
    backend: &str,
    response: Response,
) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {}", body.trim()),
    })
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {details}")]
    Corrupt { table: &'static str, details: String },

    #[error("invalid {field}: {details}")]
    InvalidValue { field: &'static str, details: String },
}

/// User-facing error taxonomy of the document and chat services.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: i64 },

    #[error("{0}")]
    ExternalService(#[from] BackendError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP-equivalent status for callers that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::NotFound { .. } => 404,
            AppError::ExternalService(_) => 502,
            AppError::Repository(_) | AppError::Ingest(_) => 500,
        }
    }
}
