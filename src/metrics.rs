//! Registry client metrics
//!
//! Counters are emitted through the `metrics` facade; installing a recorder
//! (Prometheus or otherwise) is left to the embedding application.

/// Record a cache hit that avoided a download
pub fn record_cache_hit(identifier: &str) {
    metrics::counter!("bazaar_cache_hits_total",
        "identifier" => identifier.to_string()
    )
    .increment(1);
}

/// Record the outcome of a download ("completed", "cancelled", "failed")
pub fn record_download(identifier: &str, outcome: &'static str) {
    metrics::counter!("bazaar_downloads_total",
        "identifier" => identifier.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record bytes written to disk by the download manager
pub fn record_download_bytes(bytes: u64) {
    metrics::counter!("bazaar_download_bytes_total").increment(bytes);
}

/// Record the outcome of a push ("published", "duplicate", "failed")
pub fn record_push(outcome: &'static str) {
    metrics::counter!("bazaar_pushes_total", "outcome" => outcome).increment(1);
}

/// Record a catalog record dropped for failing validation
pub fn record_entry_dropped() {
    metrics::counter!("bazaar_entries_dropped_total").increment(1);
}
