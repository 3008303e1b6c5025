use serde::Serialize;
use thiserror::Error;
use warp::{Rejection, Reply, hyper::StatusCode, reject::Reject};

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not establish database connection")]
    DatabaseConnectionError,
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("Failed to decode request header as valid utf8")]
    UtfEncodingError,
    #[error("The auth header is not formatted correctly (expected JWT 'Bearer ' header)")]
    InvalidAuthHeaderError,
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("The request is not formatted correctly: {0}")]
    BadRequestError(String),
    #[error("Video '{0}' does not belong to the current user")]
    InaccessibleVideoError(String),
    #[error("No video found for id '{0}'")]
    VideoNotFoundError(String),
    #[error("Failed to probe video: {0}")]
    ProbeError(String),
    #[error("Failed to remux video: {0}")]
    RemuxError(String),
    #[error("Failed to store object: {0}")]
    StorageError(String),
    #[error("Object storage responded with status code {0}")]
    S3ResponseError(u16),
    #[error("IO error: {0}")]
    IoError(String),
}

impl Reject for Error {}

impl From<s3::error::S3Error> for Error {
    fn from(e: s3::error::S3Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::QueryError(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    message: String,
    status: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingAuthHeaderError
            | Error::InvalidAuthHeaderError
            | Error::InvalidJwtError => StatusCode::UNAUTHORIZED,
            Error::InaccessibleVideoError(_) => StatusCode::FORBIDDEN,
            Error::VideoNotFoundError(_) => StatusCode::NOT_FOUND,
            Error::UtfEncodingError | Error::BadRequestError(_) => StatusCode::BAD_REQUEST,
            Error::DatabaseConnectionError
            | Error::QueryError(_)
            | Error::ProbeError(_)
            | Error::RemuxError(_)
            | Error::StorageError(_)
            | Error::S3ResponseError(_)
            | Error::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Creates a Rejection response for the given error and logs internal server errors.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(e) = err.find::<Error>() {
        let code = e.status_code();
        if code.is_server_error() {
            log::error!("Encountered internal server error: {}", e);
        }

        let err_response = ErrorResponse {
            message: e.to_string(),
            status: code.to_string(),
        };

        let json = warp::reply::json(&err_response);

        Ok(warp::reply::with_status(json, code))
    } else {
        Err(err)
    }
}
