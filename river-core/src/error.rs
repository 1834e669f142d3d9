use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status: {0}")]
    Http(StatusCode),
    #[error("feed parsing error: {0}")]
    Parse(#[from] ParseError),
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is neither RSS nor Atom (rss: {rss}, atom: {atom})")]
    Unrecognized {
        rss: rss::Error,
        atom: atom_syndication::Error,
    },
}
