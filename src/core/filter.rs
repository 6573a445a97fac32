//! 章节筛选 (Chapter Filtering)

use crate::core::model::Chapter;
use crate::core::range::Range;

/// 可按章节号筛选的条目
pub trait Filterable {
    fn number(&self) -> f64;
    fn title(&self) -> &str;
}

impl Filterable for Chapter {
    fn number(&self) -> f64 {
        self.number
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// 按区间顺序拼接命中的条目 (闭区间，不去重)
///
/// 调用方应先用 [`sort_by_number`] 排序，结果在每个区间内才是有序的。
pub fn filter_ranges<T: Filterable + Clone>(items: &[T], ranges: &[Range]) -> Vec<T> {
    ranges
        .iter()
        .flat_map(|range| items.iter().filter(|item| range.contains(item.number())))
        .cloned()
        .collect()
}

/// 按章节号稳定升序排序
pub fn sort_by_number<T: Filterable>(items: &mut [T]) {
    items.sort_by(|a, b| a.number().total_cmp(&b.number()));
}
