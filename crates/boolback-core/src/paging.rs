use crate::error::{BoolbackError, Result};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub samples: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: usize,
}

pub fn validate_window(page: usize, limit: usize) -> Result<()> {
    if limit < 1 {
        return Err(BoolbackError::Validation(
            "limit must be at least 1".to_string(),
        ));
    }
    if page < 1 {
        return Err(BoolbackError::Validation(
            "page must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub fn total_pages(total: usize, limit: usize) -> usize {
    std::cmp::max(1, total.div_ceil(limit.max(1)))
}

/// Half-open index range `[start, end)` covered by a page.
pub fn window(page: usize, limit: usize) -> (usize, usize) {
    let start = limit.saturating_mul(page.saturating_sub(1));
    (start, start.saturating_add(limit))
}

pub fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Result<Page<T>> {
    validate_window(page, limit)?;
    let total = items.len();
    let (start, end) = window(page, limit);
    let samples = items
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect();
    Ok(Page {
        samples,
        total,
        page,
        limit,
        total_pages: total_pages(total, limit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_concatenate_to_the_full_sequence() {
        for total in [0usize, 1, 7, 10, 23] {
            let items: Vec<usize> = (0..total).collect();
            for limit in [1usize, 3, 10, 50] {
                let pages = total_pages(total, limit);
                assert_eq!(pages, std::cmp::max(1, (total + limit - 1) / limit));
                let mut seen = Vec::new();
                for page in 1..=pages {
                    let p = paginate(items.clone(), page, limit).expect("page");
                    assert_eq!(p.total, total);
                    assert_eq!(p.total_pages, pages);
                    assert!(p.samples.len() <= limit);
                    seen.extend(p.samples);
                }
                assert_eq!(seen, items);
                let past = paginate(items.clone(), pages + 1, limit).expect("past end");
                assert!(past.samples.is_empty());
            }
        }
    }

    #[test]
    fn zero_page_or_limit_is_rejected() {
        assert_eq!(
            paginate(vec![1], 1, 0).expect_err("limit").to_string(),
            "validation error: limit must be at least 1"
        );
        assert_eq!(
            paginate(vec![1], 0, 5).expect_err("page").code(),
            "validation_error"
        );
    }
}
