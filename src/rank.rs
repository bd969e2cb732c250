//! Ranking by attention count.

use crate::models::PaperRecord;
use std::cmp::Reverse;

pub const DEFAULT_TOP_N: usize = 10;

/// The `n` most-shared records, most-shared first.
///
/// The sort is stable: records with equal counts keep their discovery
/// order, so the first one found wins a tie.
pub fn top_n(records: &[PaperRecord], n: usize) -> Vec<PaperRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by_key(|r| Reverse(r.attention_count));
    ranked.truncate(n);
    ranked
}
