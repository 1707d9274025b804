//! Per-chain plumbing: the spec-aware parser, node routing, chain fetching,
//! and head tracking.
//!
//! A [`ChainParser`] and [`ChainRouter`] exist per endpoint; one
//! [`ChainTracker`] is shared by every endpoint of a chain.

pub mod fetcher;
pub mod parser;
pub mod router;
pub mod tracker;

pub use fetcher::{ChainFetcher, FetcherMode, NodeChainFetcher};
pub use parser::{ChainParser, ParsedRelay, ParserPhase, ProviderPolicy};
pub use router::{ChainRouter, HttpChainRouter, NodeReply};
pub use tracker::{ChainTracker, ChainTrackerConfig, TrackerCallbacks};
