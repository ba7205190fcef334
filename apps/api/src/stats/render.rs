//! Flat CSV rendering of an aggregation result with a trailing totals row.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::{Cache, CacheError};
use crate::models::video::{total_views, VideoInfo};

const HEADER: [&str; 5] = ["ID", "Date", "Title", "Views", "URL"];
const TOTAL_LABEL: &str = "Total views:";

/// Renders `videos` as CSV. A row that fails to write is logged and left out;
/// it never aborts the table.
pub fn render_csv(videos: &[VideoInfo]) -> Vec<u8> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());

    if let Err(e) = writer.write_record(HEADER) {
        warn!(error = %e, "Error writing csv header");
    }

    for (index, video) in videos.iter().enumerate() {
        // Leading apostrophe keeps spreadsheets from reparsing the date.
        let record = [
            (index + 1).to_string(),
            format!("'{}", video.published_at),
            video.title.clone(),
            video.view_count.to_string(),
            video.url.clone(),
        ];
        if let Err(e) = writer.write_record(&record) {
            warn!(row = index + 1, url = %video.url, error = %e, "Error writing csv row");
        }
    }

    let total = total_views(videos).to_string();
    if let Err(e) = writer.write_record(["", "", TOTAL_LABEL, total.as_str(), ""]) {
        warn!(error = %e, "Error writing csv totals row");
    }

    match writer.into_inner() {
        Ok(buf) => buf,
        Err(e) => {
            warn!(error = %e, "Error flushing csv buffer");
            e.into_inner().into_inner().unwrap_or_default()
        }
    }
}

/// Hex SHA-256 of the JSON encoding of `videos`, used as the download ETag.
pub fn content_hash(videos: &[VideoInfo]) -> Result<String, CacheError> {
    let json = Cache::encode(videos)?;
    Ok(hex::encode(Sha256::digest(&json)))
}
