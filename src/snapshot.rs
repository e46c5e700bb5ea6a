//! The fetch-and-store loop.
//!
//! The loop alternates between two states: waiting on the ticker (or the
//! shutdown token) and transferring one image. Cycles never overlap; ticks
//! missed while transferring are skipped rather than queued.

use chrono::{DateTime, Local, TimeZone};
use reqwest::Client;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::CycleError;
use crate::fetch::fetch_image;
use crate::storage::{Bucket, NewObject, StoredObject};

/// Content type recorded on every uploaded snapshot.
pub const CONTENT_TYPE: &str = "image/jpeg";

const OBJECT_EXTENSION: &str = "jpg";

/// Object key for a snapshot taken at `at`: second precision, so two snapshots
/// within the same second share a name and the later one overwrites.
pub fn object_name<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}.{OBJECT_EXTENSION}", at.format("%Y-%m-%dT%H:%M:%S"))
}

/// Counters accumulated while the loop runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotReport {
    pub cycles: u64,
    pub uploaded: u64,
    pub failed: u64,
}

pub struct Snapshotter {
    http: Client,
    url: String,
    bucket_name: String,
    bucket: Arc<dyn Bucket>,
}

impl Snapshotter {
    pub fn new(
        http: Client,
        url: impl Into<String>,
        bucket_name: impl Into<String>,
        bucket: Arc<dyn Bucket>,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            bucket_name: bucket_name.into(),
            bucket,
        }
    }

    /// One fetch-then-upload attempt. Nothing is retried.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<StoredObject, CycleError> {
        let body = fetch_image(&self.http, &self.url, cancel).await?;
        let name = object_name(&Local::now());
        let object = NewObject {
            name,
            content_type: CONTENT_TYPE,
            body,
        };
        let stored = self.bucket.put_object(object, cancel).await?;
        Ok(stored)
    }

    /// Runs cycles every `period` until `cancel` fires. The first cycle starts
    /// one period after the call.
    pub async fn run(&self, period: Duration, cancel: &CancellationToken) -> SnapshotReport {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = SnapshotReport::default();

        info!(
            url = %self.url,
            bucket = %self.bucket_name,
            interval = %humantime::format_duration(period),
            "[SNAPSHOT] Waiting for next tick"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(?report, "[SNAPSHOT] Shutdown requested, loop stopped");
                    return report;
                }
                _ = ticker.tick() => {}
            }

            report.cycles += 1;
            match self.run_cycle(cancel).await {
                Ok(stored) => {
                    report.uploaded += 1;
                    info!(
                        object = %stored.file_name,
                        bytes = stored.content_length,
                        bucket = %self.bucket_name,
                        "[SNAPSHOT] Stored image"
                    );
                }
                Err(e) if e.is_cancelled() => {
                    report.failed += 1;
                    warn!(url = %self.url, bucket = %self.bucket_name, "[SNAPSHOT] Cycle interrupted by shutdown");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        url = %self.url,
                        bucket = %self.bucket_name,
                        error = %e,
                        "[SNAPSHOT][ERROR] Unable to save image to bucket"
                    );
                }
            }
        }
    }
}
