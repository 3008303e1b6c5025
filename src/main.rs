#[macro_use]
extern crate diesel;
#[cfg(feature = "auto_migration")]
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use std::{convert::Infallible, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use diesel_async::{
    AsyncPgConnection,
    pooled_connection::{AsyncDieselConnectionManager, deadpool::Pool},
};
use dotenvy::dotenv;
use lazy_static::lazy_static;
use mime::Mime;
use warp::{Filter, Rejection, Reply, filters::header::headers_cloned};

use crate::{
    data::{
        MAX_THUMBNAIL_UPLOAD_SIZE, MAX_VIDEO_UPLOAD_SIZE, UploadConfig,
        probe::MediaProber,
        process::ToolCommand,
        remux::FastStartRemuxer,
        s3utils::{ObjectStore, S3ObjectStore, create_bucket},
    },
    util::OptFmt,
    video::{PgVideoStore, VideoStore},
};

mod auth;
mod data;
mod error;
mod model;
mod schema;
#[cfg(test)]
mod testing;
mod util;
mod video;

lazy_static! {
    pub static ref DATABASE_URL: String = std::env::var("DATABASE_URL")
        .expect("Missing environment variable DATABASE_URL must be set to connect to postgres");
    pub static ref MAX_DB_CONNECTIONS: usize = std::env::var("MAX_DB_CONNECTIONS")
        .unwrap_or_else(|_| String::from("25"))
        .parse::<usize>()
        .expect("MAX_DB_CONNECTIONS is not a valid usize");
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .expect("Missing environment variable JWT_SECRET must be set to validate JWT tokens.");
    pub static ref PORT: u16 = {
        let port_str =
            std::env::var("API_PORT").expect("Missing environment variable API_PORT must be set.");
        u16::from_str(&port_str).expect("API_PORT var is not a valid u16 value")
    };
    pub static ref CERT_PATH: Option<String> = std::env::var("CERT_PATH").ok();
    pub static ref KEY_PATH: Option<String> = std::env::var("KEY_PATH").ok();
    pub static ref S3_BUCKET: String =
        std::env::var("S3_BUCKET").expect("Missing environment variable S3_BUCKET must be set.");
    pub static ref S3_REGION: String =
        std::env::var("S3_REGION").expect("Missing environment variable S3_REGION must be set.");
    pub static ref S3_ENDPOINT: Option<String> = std::env::var("S3_ENDPOINT").ok();
    pub static ref S3_ACCESS_KEY: String = std::env::var("S3_ACCESS_KEY")
        .expect("Missing environment variable S3_ACCESS_KEY must be set.");
    pub static ref S3_SECRET_KEY: String = std::env::var("S3_SECRET_KEY")
        .expect("Missing environment variable S3_SECRET_KEY must be set.");
    pub static ref STAGING_DIR: PathBuf = std::env::var("STAGING_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("videobroker"));
    pub static ref FFPROBE_PATH: String =
        std::env::var("FFPROBE_PATH").unwrap_or_else(|_| String::from("ffprobe"));
    pub static ref FFMPEG_PATH: String =
        std::env::var("FFMPEG_PATH").unwrap_or_else(|_| String::from("ffmpeg"));
    pub static ref PROBE_TIMEOUT: Duration = Duration::from_secs(
        std::env::var("PROBE_TIMEOUT_SECS")
            .map(|v| v
                .parse::<u64>()
                .expect("PROBE_TIMEOUT_SECS is not a valid u64"))
            .unwrap_or(30)
    );
    pub static ref REMUX_TIMEOUT: Duration = Duration::from_secs(
        std::env::var("REMUX_TIMEOUT_SECS")
            .map(|v| v
                .parse::<u64>()
                .expect("REMUX_TIMEOUT_SECS is not a valid u64"))
            .unwrap_or(600)
    );
    pub static ref CONCURRENT_MEDIA_PROCESS_LIMIT: Option<usize> =
        std::env::var("CONCURRENT_MEDIA_PROCESS_LIMIT")
            .map(|v| v
                .parse::<usize>()
                .expect("CONCURRENT_MEDIA_PROCESS_LIMIT is not a valid usize"))
            .ok();
}

#[cfg(feature = "auto_migration")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Everything a request handler needs, cloned into each request by [`with_context`].
#[derive(Clone)]
pub struct AppContext {
    pub jwt_secret: Arc<String>,
    pub upload_config: Arc<UploadConfig>,
    pub videos: Arc<dyn VideoStore>,
    pub objects: Arc<dyn ObjectStore>,
}

pub fn with_context(
    context: AppContext,
) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || context.clone())
}

fn main() {
    dotenv().ok();

    // initialise certain lazy statics on startup
    lazy_static::initialize(&DATABASE_URL);
    lazy_static::initialize(&MAX_DB_CONNECTIONS);
    lazy_static::initialize(&JWT_SECRET);
    lazy_static::initialize(&PORT);
    lazy_static::initialize(&S3_BUCKET);
    lazy_static::initialize(&S3_REGION);
    lazy_static::initialize(&S3_ACCESS_KEY);
    lazy_static::initialize(&S3_SECRET_KEY);
    lazy_static::initialize(&PROBE_TIMEOUT);
    lazy_static::initialize(&REMUX_TIMEOUT);
    lazy_static::initialize(&CONCURRENT_MEDIA_PROCESS_LIMIT);

    setup_logger();

    #[cfg(feature = "auto_migration")]
    {
        use diesel::Connection;

        log::info!("Running diesel migrations");
        let mut connection = diesel::PgConnection::establish(&DATABASE_URL)
            .expect("Failed to establish database connection for migrations");
        if let Err(e) = connection.run_pending_migrations(MIGRATIONS) {
            panic!("Failed running db migrations: {}", e);
        }
        log::info!("Done running diesel migrations");
    }

    setup_tokio_runtime();
}

fn create_upload_config() -> UploadConfig {
    UploadConfig {
        staging_dir: STAGING_DIR.clone(),
        max_video_size: MAX_VIDEO_UPLOAD_SIZE,
        max_thumbnail_size: MAX_THUMBNAIL_UPLOAD_SIZE,
        prober: MediaProber {
            ffprobe: ToolCommand::new(FFPROBE_PATH.as_str()),
            timeout: *PROBE_TIMEOUT,
        },
        remuxer: FastStartRemuxer {
            ffmpeg: ToolCommand::new(FFMPEG_PATH.as_str()),
            timeout: *REMUX_TIMEOUT,
        },
    }
}

fn create_context() -> AppContext {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(DATABASE_URL.as_str());
    let pool = Pool::builder(manager)
        .max_size(*MAX_DB_CONNECTIONS)
        .build()
        .expect("Failed to initialise connection pool");

    let bucket = create_bucket(
        &S3_BUCKET,
        &S3_REGION,
        S3_ENDPOINT.as_deref(),
        &S3_ACCESS_KEY,
        &S3_SECRET_KEY,
    )
    .expect("Failed to create S3 bucket");

    AppContext {
        jwt_secret: Arc::new(JWT_SECRET.clone()),
        upload_config: Arc::new(create_upload_config()),
        videos: Arc::new(PgVideoStore::new(pool)),
        objects: Arc::new(S3ObjectStore::new(
            bucket,
            S3_BUCKET.clone(),
            S3_REGION.clone(),
        )),
    }
}

/// All API routes, with errors rendered by [`error::handle_rejection`].
pub fn routes(
    context: AppContext,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let upload_video_route = warp::path!("videos" / String / "upload")
        .and(warp::post())
        .and(with_context(context.clone()))
        .and(headers_cloned())
        .and_then(auth::require_video_owner)
        .and(with_context(context.clone()))
        .and(warp::header::optional::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and_then(data::upload_video_handler);

    let upload_thumbnail_route = warp::path!("videos" / String / "thumbnail")
        .and(warp::post())
        .and(with_context(context.clone()))
        .and(headers_cloned())
        .and_then(auth::require_video_owner)
        .and(with_context(context))
        .and(warp::header::optional::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and_then(data::upload_thumbnail_handler);

    upload_video_route
        .or(upload_thumbnail_route)
        .recover(error::handle_rejection)
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime() {
    let context = create_context();

    if let Err(e) = tokio::fs::create_dir_all(&context.upload_config.staging_dir).await {
        log::error!(
            "Failed to create staging directory {}: {e}",
            context.upload_config.staging_dir.display()
        );
    }

    let filter = routes(context).with(warp::log::custom(|info| {
        let log_level = access_log_level(info.path(), info.elapsed());

        log::log!(
            target: "videobroker::api",
            log_level,
            "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
            OptFmt(info.remote_addr()),
            info.method(),
            info.path(),
            info.version(),
            info.status().as_u16(),
            OptFmt(info.referer()),
            OptFmt(info.user_agent()),
            info.elapsed(),
        );
    }));

    #[cfg(debug_assertions)]
    let filter = filter.with(
        warp::cors()
            .allow_any_origin()
            .allow_header("content-type")
            .allow_header("Authorization")
            .allow_method(warp::http::Method::OPTIONS)
            .allow_method(warp::http::Method::POST),
    );

    log::info!("Starting server on port {}", *PORT);
    if let (Some(cert_path), Some(key_path)) = (CERT_PATH.as_ref(), KEY_PATH.as_ref()) {
        warp::serve(filter)
            .tls()
            .cert_path(cert_path)
            .key_path(key_path)
            .run(([0, 0, 0, 0], *PORT))
            .await;
    } else {
        warp::serve(filter).run(([0, 0, 0, 0], *PORT)).await;
    }
}

/// Slow requests are logged at higher levels, except uploads which are expected to take long.
fn access_log_level(path: &str, elapsed: Duration) -> log::Level {
    let is_upload = path.ends_with("/upload") || path.ends_with("/thumbnail");
    if elapsed.as_secs() >= 10 && !is_upload {
        log::Level::Warn
    } else if elapsed.as_millis() >= 250 {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

fn setup_logger() {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs").expect("Failed to create logs/ directory");
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("videobroker", logging_level)
        .level_for("videobroker_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()
        .expect("Failed to set up logging");
}
