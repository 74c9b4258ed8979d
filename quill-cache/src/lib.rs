//! QUILL Cache - Encrypted Correction Store
//!
//! Persists prior corrections so repeated words skip the external provider.
//!
//! # On-disk layout
//!
//! Three co-located files share one stem:
//!
//! - `<name>.dat`: the entry map, serialized as JSON and sealed with AES-256-GCM
//! - `<name>.key`: 32 random bytes of master key material
//! - `<name>.salt`: the current PBKDF2 salt; its mtime records the last rotation
//!
//! Blob authentication protects the file as a whole. Each entry additionally
//! carries a SHA-256 digest over (word, context), so an entry looked up with a
//! different context is a miss.
//!
//! # Example
//!
//! ```ignore
//! let cache = SecureCache::open(CacheConfig::in_dir("/tmp/quill"))?;
//! cache.add("qe", "creo qe esto", "que", true)?;
//! assert_eq!(cache.get("qe", "creo qe esto"), Some(Correction::new("que", true)));
//! ```

pub mod crypto;
pub mod entry;
pub mod secure_cache;

pub use crypto::EncryptionContext;
pub use entry::{digest_of, CacheEntry};
pub use secure_cache::{CachePaths, CacheStats, SecureCache};
