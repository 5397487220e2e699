//! Key layout for the marketplace.
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `market:` | sorted set | `<item>.<seller>` scored by price |
//! | `inventory:<owner>` | set | item ids held by `owner` |
//! | `account:<id>` | hash | field `funds` |

/// The global market sorted set.
pub const MARKET: &str = "market:";

/// Hash field holding an account's funds.
pub const FUNDS_FIELD: &str = "funds";

/// Inventory set of `owner`.
pub fn inventory(owner: &str) -> String {
    format!("inventory:{owner}")
}

/// Account hash of `id`.
pub fn account(id: &str) -> String {
    format!("account:{id}")
}

/// Member of [`MARKET`] for `item` listed by `seller`.
pub fn listing(item: &str, seller: &str) -> String {
    format!("{item}.{seller}")
}
