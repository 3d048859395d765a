pub mod fingerprint;
pub mod normalize;

pub use fingerprint::fingerprint;
pub use normalize::{normalize_title, Normalizer, DEFAULT_BRAND_WORDS, DEFAULT_STOP_WORDS};
