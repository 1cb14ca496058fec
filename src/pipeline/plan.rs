//! Batch planning: partition the page sequence under a text budget.
//!
//! The planner is pure and deterministic — the same pages and budget always
//! produce the same batches, which is what makes the on-disk response cache
//! replayable across runs.

use crate::pipeline::render::Page;

/// A contiguous group of pages submitted together in one inference request.
///
/// Invariants: batches partition the full page sequence without gaps,
/// overlap, or reordering, and `text_len()` stays within the configured
/// budget except for a singleton batch formed from one oversized page.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position in the plan; equals original page order.
    pub index: usize,
    /// The pages, in document order.
    pub pages: Vec<Page>,
}

impl Batch {
    /// Cumulative character length of the batch's page texts.
    pub fn text_len(&self) -> usize {
        self.pages.iter().map(|p| p.text.len()).sum()
    }

    /// The 0-indexed document pages this batch covers.
    pub fn page_indices(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.index).collect()
    }
}

/// Greedily group pages into contiguous batches bounded by `budget`
/// characters of text.
///
/// Walks pages in order, keeping a running total; a page that would push
/// the current batch over the budget closes it and starts the next one.
/// A page whose own text exceeds the budget still gets its own batch —
/// pages are never dropped and never split mid-page.
pub fn plan(pages: Vec<Page>, budget: usize) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<Page> = Vec::new();
    let mut current_len = 0usize;

    for page in pages {
        let page_len = page.text.len();
        if !current.is_empty() && current_len + page_len > budget {
            batches.push(Batch {
                index: batches.len(),
                pages: std::mem::take(&mut current),
            });
            current_len = 0;
        }
        current_len += page_len;
        current.push(page);
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            pages: current,
        });
    }

    batches
}
