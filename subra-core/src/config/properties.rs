pub struct Properties {
    /// Upper bound on rehydrated shared values kept per replacement cache.
    /// Entries beyond the bound are evicted least-recently-used first.
    replacement_cache_capacity: usize,
    /// How long `wait_for_ack` blocks when the integration layer does not
    /// supply its own deadline. MILLISECONDS
    default_ack_timeout_ms: u64,
    /// A single reaction dispatch running longer than this is logged at warn
    /// level. MILLISECONDS
    slow_reaction_threshold_ms: u64,
}

impl Properties {
    pub fn get_replacement_cache_capacity() -> usize {
        Properties::default().replacement_cache_capacity
    }

    pub fn get_default_ack_timeout_ms() -> u64 {
        Properties::default().default_ack_timeout_ms
    }

    pub fn get_slow_reaction_threshold_ms() -> u64 {
        Properties::default().slow_reaction_threshold_ms
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            replacement_cache_capacity: 32,
            default_ack_timeout_ms: 30_000, // 30s
            slow_reaction_threshold_ms: 1_000,
        }
    }
}
