// Channel video statistics: cached aggregation, CSV rendering and the HTTP
// handlers that expose them.

pub mod handlers;
pub mod pipeline;
pub mod render;

pub use pipeline::{StatsError, VideoQuery, VideoStats};
