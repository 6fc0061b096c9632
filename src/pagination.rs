use serde::Serialize;
use url::Url;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::validation::validate_page;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Page<T> {
    /// Items across all pages.
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Splits an ordered list into pages and links neighbouring pages with the
/// same query parameters.
#[derive(Debug, Clone)]
pub struct Paginator {
    url: Url,
    range: Option<String>,
    limit: usize,
    page: usize,
}

impl Paginator {
    pub fn new(
        public_url: &Url,
        path: &str,
        range: Option<String>,
        limit: usize,
        page: usize,
    ) -> Result<Self, BookingError> {
        let (limit, page) = validate_page(limit, page)?;
        let mut url = public_url.clone();
        url.set_path(&format!("{}{}", public_url.path().trim_end_matches('/'), path));
        url.set_query(None);
        Ok(Self {
            url,
            range,
            limit,
            page,
        })
    }

    fn link(&self, page: usize) -> String {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(range) = &self.range {
                query.append_pair("range", range);
            }
            query
                .append_pair("limit", &self.limit.to_string())
                .append_pair("page", &page.to_string());
        }
        url.into()
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> Result<Page<T>, BookingError> {
        let count = items.len();
        let pages = count.div_ceil(self.limit).max(1);
        if self.page > pages {
            return Err(BookingError::NotFound("Invalid page.".into()));
        }
        let results = items
            .into_iter()
            .skip((self.page - 1) * self.limit)
            .take(self.limit)
            .collect();
        Ok(Page {
            count,
            next: (self.page < pages).then(|| self.link(self.page + 1)),
            previous: (self.page > 1).then(|| self.link(self.page - 1)),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paginator(range: Option<&str>, limit: usize, page: usize) -> Paginator {
        Paginator::new(
            &Url::parse("http://localhost:8080").unwrap(),
            "/accounts/1/schedule",
            range.map(String::from),
            limit,
            page,
        )
        .unwrap()
    }

    #[test]
    fn test_middle_page_links_both_ways() {
        let page = paginator(Some("14"), 2, 2).paginate((1..=5).collect()).unwrap();
        assert_eq!(page.count, 5);
        assert_eq!(page.results, vec![3, 4]);
        assert_eq!(
            page.next.as_deref(),
            Some("http://localhost:8080/accounts/1/schedule?range=14&limit=2&page=3")
        );
        assert_eq!(
            page.previous.as_deref(),
            Some("http://localhost:8080/accounts/1/schedule?range=14&limit=2&page=1")
        );
    }

    #[test]
    fn test_last_page_and_no_range() {
        let page = paginator(None, 2, 3).paginate((1..=5).collect()).unwrap();
        assert_eq!(page.results, vec![5]);
        assert_eq!(page.next, None);
        assert_eq!(
            page.previous.as_deref(),
            Some("http://localhost:8080/accounts/1/schedule?limit=2&page=2")
        );
    }

    #[test]
    fn test_empty_list_has_one_page() {
        let page = paginator(Some("all"), 20, 1).paginate(Vec::<u8>::new()).unwrap();
        assert_eq!(page.count, 0);
        assert!(page.results.is_empty());
        assert_eq!((page.next, page.previous), (None, None));
    }

    #[test]
    fn test_page_past_the_end_is_not_found() {
        let err = paginator(None, 2, 4).paginate((1..=5).collect::<Vec<_>>()).unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[test]
    fn test_public_url_prefix_is_kept() {
        let paginator = Paginator::new(
            &Url::parse("https://example.com/api/").unwrap(),
            "/payments",
            None,
            1,
            1,
        )
        .unwrap();
        let page = paginator.paginate(vec!['a', 'b']).unwrap();
        assert_eq!(
            page.next.as_deref(),
            Some("https://example.com/api/payments?limit=1&page=2")
        );
    }
}
