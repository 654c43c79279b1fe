// Database models for the storefront

pub mod user;
pub mod subscription;
pub mod promo_code;
pub mod payment;

pub use user::*;
pub use subscription::*;
pub use promo_code::*;
pub use payment::*;

use serde::{Deserialize, Serialize};

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, 200),
            offset: offset.max(0),
        }
    }

    pub fn page(page: i64, per_page: i64) -> Self {
        Self::new(per_page, (page.max(1) - 1) * per_page)
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        Self {
            items,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
        }
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.limit < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamps_limits() {
        let p = Pagination::new(0, -5);
        assert_eq!(p.limit, 1);
        assert_eq!(p.offset, 0);

        let p = Pagination::page(3, 10);
        assert_eq!(p.offset, 20);
    }

    #[test]
    fn test_paginated_result_has_more() {
        let p = Pagination::new(10, 0);
        let page = PaginatedResult::new(vec![1, 2, 3], 25, &p);
        assert!(page.has_more());

        let p = Pagination::new(10, 20);
        let page = PaginatedResult::new(vec![1], 21, &p);
        assert!(!page.has_more());
    }
}
