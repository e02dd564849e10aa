//! Page cursor derived from the last accepted server response.

use std::fmt;

/// Entry in the truncated page strip. `Ellipsis` is a placeholder, not a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    Page(u32),
    Ellipsis,
}

impl fmt::Display for PageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSlot::Page(n) => write!(f, "{}", n),
            PageSlot::Ellipsis => f.write_str("..."),
        }
    }
}

/// Current page and page count. Only ever updated from a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    page: u32,
    total_pages: u32,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            page: 1,
            total_pages: 1,
        }
    }
}

impl PaginationCursor {
    /// Pages visible without truncation.
    const FULL_STRIP_MAX: u32 = 7;

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn is_first_page(&self) -> bool {
        self.page == 1
    }

    /// Whether `goTo(n)` may dispatch at all.
    pub fn accepts(&self, n: u32) -> bool {
        n >= 1 && n <= self.total_pages
    }

    /// Apply the outcome of an accepted response.
    ///
    /// `total_pages` is floored at 1 (servers report 0 for no matches) and the page is
    /// clamped into range so that `1 <= page <= total_pages` always holds.
    pub fn apply(&mut self, page: u32, total_pages: u32) {
        self.total_pages = total_pages.max(1);
        self.page = page.clamp(1, self.total_pages);
    }

    /// Truncated page strip for the current position.
    pub fn window(&self) -> Vec<PageSlot> {
        let (current, total) = (self.page, self.total_pages);
        if total <= Self::FULL_STRIP_MAX {
            return (1..=total).map(PageSlot::Page).collect();
        }

        let mut slots = Vec::with_capacity(Self::FULL_STRIP_MAX as usize);
        if current <= 4 {
            slots.extend((1..=5).map(PageSlot::Page));
            slots.push(PageSlot::Ellipsis);
            slots.push(PageSlot::Page(total));
        } else if current >= total - 3 {
            slots.push(PageSlot::Page(1));
            slots.push(PageSlot::Ellipsis);
            slots.extend((total - 4..=total).map(PageSlot::Page));
        } else {
            slots.push(PageSlot::Page(1));
            slots.push(PageSlot::Ellipsis);
            slots.extend((current - 1..=current + 1).map(PageSlot::Page));
            slots.push(PageSlot::Ellipsis);
            slots.push(PageSlot::Page(total));
        }
        slots
    }
}
