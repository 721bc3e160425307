use serde::Serialize;

use crate::data::TicketCounts;

/// Where the current page sits relative to the page links a list view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    /// Few enough pages to list them all.
    Compact,
    Start,
    Center,
    End,
}

/// Paging figures for one ticket list request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationMetadata {
    pub current_page: i64,
    pub page_size: i64,
    /// Tickets matching the active filter.
    pub total_items: i64,
    pub total_pages: i64,
    pub total_open: i64,
    pub total_in_progress: i64,
    pub total_closed: i64,
    pub total_tickets: i64,
    pub page_state: PageState,
    pub pages: Vec<i64>,
    pub has_previous: bool,
    pub has_next: bool,
}

impl PaginationMetadata {
    /// `current_page` is 1-based; both it and `page_size` are clamped to at
    /// least 1. Anything past the last page lands on the first empty page
    /// after it.
    pub fn new(current_page: i64, page_size: i64, total_items: i64, counts: TicketCounts) -> Self {
        let page_size = page_size.max(1);
        let total_items = total_items.max(0);
        let total_pages = total_items / page_size + i64::from(total_items % page_size != 0);
        let current_page = current_page.clamp(1, total_pages.saturating_add(1));

        let window = page_size / 2;
        let page_state = page_state(current_page, total_pages, window);
        let pages = page_links(page_state, current_page, total_pages, window / 2);

        Self {
            current_page,
            page_size,
            total_items,
            total_pages,
            total_open: counts.open,
            total_in_progress: counts.in_progress,
            total_closed: counts.closed,
            total_tickets: counts.total(),
            page_state,
            pages,
            has_previous: current_page > 1,
            has_next: current_page < total_pages,
        }
    }

    /// Rows to skip before this page.
    pub fn skip(&self) -> i64 {
        (self.current_page - 1).saturating_mul(self.page_size)
    }

    pub fn take(&self) -> i64 {
        self.page_size
    }
}

fn page_state(current: i64, total_pages: i64, window: i64) -> PageState {
    if total_pages <= window {
        PageState::Compact
    } else if current <= window {
        PageState::Start
    } else if current > total_pages - window {
        PageState::End
    } else {
        PageState::Center
    }
}

fn page_links(state: PageState, current: i64, total_pages: i64, radius: i64) -> Vec<i64> {
    match state {
        PageState::Compact | PageState::Start => (1..=total_pages).collect(),
        PageState::End => ((current - radius).max(1)..=total_pages).collect(),
        PageState::Center => {
            ((current - radius).max(1)..=(current + radius).min(total_pages)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(open: i64, closed: i64) -> TicketCounts {
        TicketCounts {
            open,
            in_progress: 0,
            closed,
        }
    }

    #[test]
    fn twelve_tickets_four_per_page() {
        let p = PaginationMetadata::new(2, 4, 12, counts(7, 5));
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.total_tickets, 12);
        assert_eq!(p.skip(), 4);
        assert_eq!(p.take(), 4);
        assert_eq!(p.page_state, PageState::Start);
        assert_eq!(p.pages, vec![1, 2, 3]);
        assert!(p.has_previous && p.has_next);
    }

    #[test]
    fn total_pages_is_ceiling_division() {
        for size in 1..=12 {
            for items in 0..=40 {
                let p = PaginationMetadata::new(1, size, items, TicketCounts::default());
                let expected = (items as f64 / size as f64).ceil() as i64;
                assert_eq!(p.total_pages, expected, "items={items} size={size}");
            }
        }
    }

    #[test]
    fn empty_list_is_compact_without_pages() {
        let p = PaginationMetadata::new(1, 10, 0, TicketCounts::default());
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.page_state, PageState::Compact);
        assert!(p.pages.is_empty());
        assert!(!p.has_previous && !p.has_next);
    }

    #[test]
    fn states_across_a_long_list() {
        // 100 items of 8: 13 pages, window 4, radius 2
        let at = |page| PaginationMetadata::new(page, 8, 100, TicketCounts::default());
        assert_eq!(at(1).total_pages, 13);

        assert_eq!(at(4).page_state, PageState::Start);
        assert_eq!(at(4).pages, (1..=13).collect::<Vec<_>>());

        let center = at(6);
        assert_eq!(center.page_state, PageState::Center);
        assert_eq!(center.pages, vec![4, 5, 6, 7, 8]);

        let end = at(11);
        assert_eq!(end.page_state, PageState::End);
        assert_eq!(end.pages, vec![9, 10, 11, 12, 13]);
        assert!(!at(13).has_next);
    }

    #[test]
    fn pages_past_the_end_are_clamped() {
        let p = PaginationMetadata::new(4, 4, 12, counts(7, 5));
        assert_eq!(p.current_page, 4);
        assert_eq!(p.skip(), 12);
        assert!(p.has_previous && !p.has_next);

        let p = PaginationMetadata::new(i64::MAX, 10, 12, counts(7, 5));
        assert_eq!(p.total_pages, 2);
        assert_eq!(p.current_page, 3);
        assert_eq!(p.skip(), 20);

        let p = PaginationMetadata::new(2, i64::MAX, i64::MAX, TicketCounts::default());
        assert_eq!(p.total_pages, 1);
        assert_eq!(p.skip(), i64::MAX);
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let p = PaginationMetadata::new(0, 0, 3, TicketCounts::default());
        assert_eq!(p.page_size, 1);
        assert_eq!(p.current_page, 1);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.skip(), 0);
    }
}
