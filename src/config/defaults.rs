use std::time::Duration;

pub(super) fn default_issue_type() -> String {
    "Bug".to_string()
}

pub(super) const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(super) fn default_priority_property() -> Option<String> {
    Some(crate::priority::LEVEL_SOURCE.to_string())
}

pub(super) fn default_tags_property() -> Option<String> {
    Some("Tags".to_string())
}

pub(super) const fn default_concurrency() -> usize {
    4
}

pub(super) const fn default_queue_bound() -> usize {
    64
}

pub(super) const fn default_dedup_cache_size() -> usize {
    256
}

pub(super) const fn default_dedup_lock_ttl() -> Duration {
    Duration::from_secs(60)
}
