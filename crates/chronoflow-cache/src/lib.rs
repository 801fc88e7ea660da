//! ChronoFlow caches — workspace directory snapshots, webhook
//! idempotency, and a TTL view over the external rule store.

pub mod directory;
pub mod idempotency;
pub mod rules;

pub use directory::{DirectoryCache, DirectorySnapshot};
pub use idempotency::{
    Fingerprinter, IdempotencyCache, IdempotencyStore, InMemoryIdempotencyStore,
    PreferredFieldFingerprinter,
};
pub use rules::RuleCache;
