mod bounded_cache;

pub use bounded_cache::BoundedCache;
