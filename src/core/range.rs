//! 章节区间表达式解析 (Range Expression Parser)
//!
//! 形如 `1-3,5,7.5` 的表达式，解析为按出现顺序排列的闭区间序列。

use std::fmt;

use crate::core::error::{ComicError, Result};
use crate::core::model::format_number;

/// 闭区间 `[begin, end]`，解析后保证 `end >= begin`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub begin: f64,
    pub end: f64,
}

impl Range {
    pub fn new(begin: f64, end: f64) -> Self {
        Self {
            begin,
            end: if end < begin { begin } else { end },
        }
    }

    pub fn contains(&self, number: f64) -> bool {
        number >= self.begin && number <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.begin == self.end {
            write!(f, "{}", format_number(self.begin))
        } else {
            write!(f, "{}-{}", format_number(self.begin), format_number(self.end))
        }
    }
}

/// 解析区间表达式
///
/// 空片段忽略；含多个 `-` 的片段静默跳过；数字非法时整体失败。
pub fn parse(text: &str) -> Result<Vec<Range>> {
    let mut ranges = Vec::new();

    for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if token.contains('-') {
            let bounds: Vec<&str> = token.split('-').collect();
            let [begin, end] = bounds.as_slice() else {
                continue;
            };
            ranges.push(Range::new(parse_bound(begin, token)?, parse_bound(end, token)?));
        } else {
            let n = parse_bound(token, token)?;
            ranges.push(Range::new(n, n));
        }
    }

    Ok(ranges)
}

/// 序列化为可被 [`parse`] 重新解析的表达式
pub fn format_ranges(ranges: &[Range]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_bound(raw: &str, token: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ComicError::InvalidRange {
            token: token.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_expression_in_order() {
        let ranges = parse("1-3, 5 ,7.5").unwrap();
        assert_eq!(
            ranges,
            vec![Range::new(1.0, 3.0), Range::new(5.0, 5.0), Range::new(7.5, 7.5)]
        );
    }

    #[test]
    fn reversed_bounds_clamp_to_begin() {
        assert_eq!(parse("10-5").unwrap(), vec![Range { begin: 10.0, end: 10.0 }]);
    }

    #[test]
    fn empty_tokens_and_multi_dash_are_skipped() {
        assert_eq!(parse(",,2,, 1-2-3 ,").unwrap(), vec![Range::new(2.0, 2.0)]);
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn bad_number_names_token() {
        match parse("1-3,abc") {
            Err(ComicError::InvalidRange { token }) => assert_eq!(token, "abc"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(parse("4-x"), Err(ComicError::InvalidRange { token }) if token == "4-x"));
        assert!(parse("-3").is_err());
    }

    #[test]
    fn overlaps_and_duplicates_are_kept() {
        assert_eq!(parse("1-5,3-4,3").unwrap().len(), 3);
    }

    #[test]
    fn formatting_round_trips_through_parse() {
        for expr in ["1-3,5", "0.5-2.5", "7,7,1-2", "12-4"] {
            let once = parse(expr).unwrap();
            let again = parse(&format_ranges(&once)).unwrap();
            assert_eq!(once, again, "expression {expr}");
        }
    }
}
