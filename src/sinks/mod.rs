//! Frame consumers that leave the acquisition loop quickly and do their
//! real work elsewhere.

pub mod publisher;
pub mod snapshot;

pub use publisher::{channel as publisher_channel, run_publisher, PublisherFeed, PublisherSink, StatsTrack, VideoTrack};
pub use snapshot::{SnapshotSink, SnapshotTrigger};
