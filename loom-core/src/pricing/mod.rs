//! C3: TTL-bounded price cache and FX rate source.

pub mod price_cache;

pub use price_cache::PriceCache;
