table! {
    video (id) {
        id -> Varchar,
        user_id -> Varchar,
        title -> Nullable<Varchar>,
        description -> Nullable<Varchar>,
        video_url -> Nullable<Varchar>,
        thumbnail_url -> Nullable<Varchar>,
        creation_timestamp -> Timestamptz,
        update_timestamp -> Timestamptz,
    }
}
