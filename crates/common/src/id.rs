//! ID generation utilities.

use uuid::Uuid;

/// ID generator for entities and activity identifiers.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a time-ordered UUID v7 ID, suitable for primary keys.
    #[must_use]
    pub fn generate(&self) -> String {
        Uuid::now_v7().to_string()
    }

    /// Generate a short random token, used as the unique suffix of
    /// activity IDs (`<actor>#<verb>-<token>`).
    #[must_use]
    pub fn generate_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
