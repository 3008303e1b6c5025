use chrono::{DateTime, offset::Utc};
use diesel::{Identifiable, Queryable, Selectable};
use serde::Serialize;

use crate::schema::video;

/// A video record as persisted in the `video` table.
///
/// Records are created elsewhere; this service only ever sets `video_url` and `thumbnail_url`
/// (and bumps `update_timestamp`). `user_id` is never written after creation.
#[derive(Identifiable, Queryable, Selectable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = video)]
#[diesel(primary_key(id))]
pub struct Video {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    pub update_timestamp: DateTime<Utc>,
}

impl Video {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
