use serde::{Deserialize, Deserializer};

/// One page of a list endpoint.
///
/// Paginated endpoints answer `{results, total_pages, count, next, previous}`;
/// unpaginated ones answer a bare array, which decodes as a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub total_pages: u32,
    pub count: Option<u64>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageBody<T> {
    Paginated {
        results: Vec<T>,
        #[serde(default)]
        total_pages: Option<u32>,
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
    },
    Bare(Vec<T>),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Page<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PageBody::deserialize(deserializer)? {
            PageBody::Paginated {
                results,
                total_pages,
                count,
                next,
                previous,
            } => Page {
                results,
                total_pages: total_pages.unwrap_or(1).max(1),
                count,
                next,
                previous,
            },
            PageBody::Bare(results) => Page {
                results,
                total_pages: 1,
                count: None,
                next: None,
                previous: None,
            },
        })
    }
}

/// `page` / `page_size` query parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: i64,
    }

    #[test]
    fn test_paginated_envelope() {
        let json = r#"{"count": 12, "next": "https://x/api/tasks/?page=2", "previous": null, "total_pages": 2, "results": [{"id": 1}, {"id": 2}]}"#;
        let page: Page<Item> = serde_json::from_str(json).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.count, Some(12));
        assert!(page.has_next());
    }

    #[test]
    fn test_missing_total_pages_defaults_to_one() {
        let page: Page<Item> = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next());
    }

    #[test]
    fn test_bare_array() {
        let page: Page<Item> = serde_json::from_str(r#"[{"id": 5}]"#).unwrap();
        assert_eq!(page.results, vec![Item { id: 5 }]);
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn test_page_request_clamps_to_one() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, page_size: 1 });
    }
}
