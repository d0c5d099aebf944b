//! Query id generation.

use std::sync::Mutex;

use ulid::{Generator, Ulid};

/// Prefix of every externally visible query id.
pub const QUERY_ID_PREFIX: &str = "adhoc_";

/// Produces collision-resistant identifiers. The gateway adds [`QUERY_ID_PREFIX`].
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// ULID-based generator: 48-bit millisecond timestamp plus 80 random bits,
/// Crockford base32. Ids from one generator sort in creation order, even
/// within the same millisecond.
pub struct UlidGenerator {
    inner: Mutex<Generator>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> String {
        let mut generator = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // The monotonic counter only overflows after 2^80 ids in one millisecond.
        generator
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }
}

/// The external id for a freshly generated identifier.
pub(crate) fn query_id(generator: &dyn IdGenerator) -> String {
    format!("{QUERY_ID_PREFIX}{}", generator.generate())
}
