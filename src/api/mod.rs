pub mod anomaly;
pub mod error;
pub mod events;
pub mod learning;
pub mod notifications;
pub mod patterns;
pub mod predictions;
pub mod rules;
pub mod scenes;
pub mod schedule;
pub mod settings;

pub use error::{ApiResult, EngineError};

use serde::Serialize;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Collection envelope. Queries overfetch by one row; `page` trims the
/// extra and turns it into the has_more flag.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

pub fn page<T>(mut rows: Vec<T>, limit: i64) -> Paginated<T> {
    let has_more = rows.len() as i64 > limit;
    if has_more {
        rows.truncate(limit as usize);
    }
    Paginated { items: rows, has_more }
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, 500)
}

/// For small config collections the store returns in full; slicing here
/// keeps the envelope uniform without pushing limit/offset into every query.
pub fn page_in_memory<T>(rows: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Paginated<T> {
    let limit = clamp_limit(limit) as usize;
    let offset = offset.unwrap_or(0).max(0) as usize;
    let has_more = rows.len() > offset + limit;
    let items = rows.into_iter().skip(offset).take(limit).collect();
    Paginated { items, has_more }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_trims_the_overfetched_row() {
        let p = page(vec![1, 2, 3, 4], 3);
        assert_eq!(p.items, vec![1, 2, 3]);
        assert!(p.has_more);

        let p = page(vec![1, 2, 3], 3);
        assert_eq!(p.items.len(), 3);
        assert!(!p.has_more);
    }
}
