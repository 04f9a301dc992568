use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Limit within `1..=MAX_PAGE_SIZE`, offset never negative.
    pub fn normalized(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.max(0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplyForm {
    #[serde(default)]
    pub reply_content: String,
}

/// Body of JSON answers to `DELETE` requests and webhook deliveries.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn new(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination { limit: 0, offset: -5 }.normalized();
        assert_eq!((p.limit, p.offset), (1, 0));
        let p = Pagination { limit: 10_000, offset: 40 }.normalized();
        assert_eq!((p.limit, p.offset), (MAX_PAGE_SIZE, 40));
    }

    #[test]
    fn pagination_defaults_from_empty_query() {
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!((p.limit, p.offset), (DEFAULT_PAGE_SIZE, 0));
    }
}
