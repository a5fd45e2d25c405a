pub struct Monitors;

impl Monitors {
    pub fn error(_class_name: &str, _method_name: &str) {}

    pub fn record_match(_channel_id: u32) {}

    pub fn record_reaction_dispatch_time(_duration_ms: i64) {}

    pub fn record_channel_created(_capability: &str) {}

    pub fn record_release_miss() {}

    pub fn record_registration_count(_count: usize) {}

    pub fn record_exchange_ack(_mex_id: &str, _ack_type: &str) {}

    pub fn record_snapshot_bytes(_size: usize) {}

    pub fn record_job_scheduled(_job_type: &str, _persisted: bool) {}
}
