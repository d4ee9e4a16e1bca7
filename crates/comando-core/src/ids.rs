//! UUID helpers.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7.
///
/// All primary keys use v7 so rows sort chronologically, which keeps the
/// claim queries (`ORDER BY occurred_at` / `ORDER BY next_attempt_at`)
/// index-friendly and log correlation cheap.
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
