use async_trait::async_trait;
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::deadpool::{Object, Pool},
};

use crate::{error::Error, model::Video, schema::video};

pub type DbPool = Pool<AsyncPgConnection>;

/// Lookup and update of persisted video records.
///
/// Each setter writes a single URL column (and bumps `update_timestamp`) and returns the record
/// as persisted, so concurrent uploads of a video and its thumbnail never overwrite each other.
/// The owning user is never written.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Video>, Error>;

    async fn set_video_url(&self, id: &str, video_url: &str) -> Result<Video, Error>;

    async fn set_thumbnail_url(&self, id: &str, thumbnail_url: &str) -> Result<Video, Error>;
}

pub struct PgVideoStore {
    pool: DbPool,
}

impl PgVideoStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn acquire_db_connection(&self) -> Result<Object<AsyncPgConnection>, Error> {
        self.pool
            .get()
            .await
            .map_err(|_| Error::DatabaseConnectionError)
    }
}

fn missing_on_update(id: &str, result: Option<Video>) -> Result<Video, Error> {
    result.ok_or_else(|| {
        log::warn!("Video {} disappeared before its update could be persisted", id);
        Error::VideoNotFoundError(String::from(id))
    })
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get(&self, id: &str) -> Result<Option<Video>, Error> {
        let mut connection = self.acquire_db_connection().await?;
        video::table
            .filter(video::id.eq(id))
            .select(Video::as_select())
            .get_result::<Video>(&mut connection)
            .await
            .optional()
            .map_err(Error::from)
    }

    async fn set_video_url(&self, id: &str, video_url: &str) -> Result<Video, Error> {
        let mut connection = self.acquire_db_connection().await?;
        let updated = diesel::update(video::table.filter(video::id.eq(id)))
            .set((
                video::video_url.eq(video_url),
                video::update_timestamp.eq(Utc::now()),
            ))
            .returning(Video::as_returning())
            .get_result::<Video>(&mut connection)
            .await
            .optional()?;

        missing_on_update(id, updated)
    }

    async fn set_thumbnail_url(&self, id: &str, thumbnail_url: &str) -> Result<Video, Error> {
        let mut connection = self.acquire_db_connection().await?;
        let updated = diesel::update(video::table.filter(video::id.eq(id)))
            .set((
                video::thumbnail_url.eq(thumbnail_url),
                video::update_timestamp.eq(Utc::now()),
            ))
            .returning(Video::as_returning())
            .get_result::<Video>(&mut connection)
            .await
            .optional()?;

        missing_on_update(id, updated)
    }
}
