pub mod fetcher;
pub mod history;
pub mod insight;
pub mod metrics;
pub mod normalizer;
pub mod poller;
pub mod projections;

#[cfg(test)]
pub(crate) mod test_support;

/// The cache as wired in production: backed by the live InSight feed.
pub type TelemetryFetcher = fetcher::Fetcher<insight::InsightClient>;
