use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use warp::{
    Rejection,
    http::header::{self, HeaderMap},
};

use crate::{AppContext, error::Error, model::Video};

const JWT_BEARER_PREFIX: &str = "Bearer ";

/// Struct encoded in the JWT that contains its expiry and subject user.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,
    pub sub: String,
}

/// A video record whose ownership by the requesting user has been verified.
#[derive(Debug, Clone)]
pub struct AuthorizedVideo {
    pub user_id: String,
    pub video: Video,
}

/// Validates the given JWT against the secret and returns the identifier of the subject user.
///
/// Fails with [`Error::InvalidJwtError`] if the token is malformed, expired or signed with
/// another secret.
pub fn validate_token(token: &str, secret: &[u8]) -> Result<String, Error> {
    // fails if expired
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS512),
    )
    .map_err(|_| Error::InvalidJwtError)?;

    Ok(token_data.claims.sub)
}

fn bearer_token(header_map: &HeaderMap) -> Result<&str, Error> {
    let auth_header = match header_map.get(header::AUTHORIZATION) {
        Some(h) => std::str::from_utf8(h.as_bytes()).map_err(|_| Error::UtfEncodingError)?,
        None => return Err(Error::MissingAuthHeaderError),
    };

    auth_header
        .strip_prefix(JWT_BEARER_PREFIX)
        .ok_or(Error::InvalidAuthHeaderError)
}

/// Warp handler that resolves the user from the auth header and loads the video addressed by the
/// path, rejecting the request unless the user owns the video. Chained before the body filter so
/// that none of the body is read for rejected requests.
pub async fn require_video_owner(
    video_id: String,
    context: AppContext,
    header_map: HeaderMap,
) -> Result<AuthorizedVideo, Rejection> {
    authorize_video_owner(&context, &video_id, &header_map)
        .await
        .map_err(warp::reject::custom)
}

pub async fn authorize_video_owner(
    context: &AppContext,
    video_id: &str,
    header_map: &HeaderMap,
) -> Result<AuthorizedVideo, Error> {
    let token = bearer_token(header_map)?;
    let user_id = validate_token(token, context.jwt_secret.as_bytes())?;

    let video = context
        .videos
        .get(video_id)
        .await?
        .ok_or_else(|| Error::VideoNotFoundError(video_id.to_string()))?;

    if !video.is_owned_by(&user_id) {
        log::warn!(
            "User {} attempted to upload to video {} owned by {}",
            &user_id,
            video_id,
            &video.user_id
        );
        return Err(Error::InaccessibleVideoError(video_id.to_string()));
    }

    Ok(AuthorizedVideo { user_id, video })
}
