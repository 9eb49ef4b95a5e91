//! Database row types. These map directly to SQLite rows and stay
//! independent of the murmur-types wire models.

pub struct MessageRow {
    pub id: i64,
    pub content: String,
    pub sender: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}
