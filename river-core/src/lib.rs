pub mod config;
pub mod error;
pub mod estimator;
pub mod fetch;
pub mod fingerprint;
pub mod parse;
pub mod poller;
pub mod river;
pub mod riverjs;
pub mod schedule;
mod storage;
pub mod subscriptions;
pub mod text;

pub use config::RiverConfig;
pub use error::{ParseError, PollError};
pub use estimator::IntervalEstimator;
pub use fetch::{build_client, FetchCache, Fetched, Fetcher};
pub use fingerprint::{fingerprint, FingerprintLedger};
pub use parse::{parse_feed, ParsedEntry, ParsedFeed};
pub use poller::{poll_feed, run_batch, spawn_poller, Event, PollContext, PollerHandle};
pub use river::{AggregationSink, AppendOutcome, FeedMeta, RiverSnapshot, Update, FIREHOSE};
pub use riverjs::{render_river_js, write_river_js};
pub use schedule::Schedule;
pub use subscriptions::{load_subscriptions, parse_subscriptions, Subscription, SubscriptionError};
pub use text::clean_text;
