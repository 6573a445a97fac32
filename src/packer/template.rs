//! 文件名模板
//!
//! 支持 `{series}` `{number}` `{title}` `{language}` 四个占位符。

use crate::core::error::{ComicError, Result};
use crate::core::model::Chapter;

/// 模板占位符取值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateParts {
    pub series: String,
    pub number: String,
    pub title: String,
    pub language: String,
}

impl TemplateParts {
    /// 单章节取值，章节号补零至四位 (10.5 -> 0010.5)
    pub fn for_chapter(series: &str, chapter: &Chapter) -> Self {
        Self {
            series: series.to_string(),
            number: padded_number(chapter.number),
            title: chapter.title.clone(),
            language: chapter.language.clone(),
        }
    }

    /// 合集取值：章节号位置写入带前缀的原始区间表达式
    pub fn for_bundle(series: &str, range: &str) -> Self {
        let label = if range.contains('-') || range.contains(',') {
            "Chapters"
        } else {
            "Chapter"
        };
        Self {
            series: series.to_string(),
            number: format!("{} {}", label, range),
            title: "bundle".to_string(),
            language: String::new(),
        }
    }
}

/// 渲染模板并清理为合法文件名
pub fn render(template: &str, parts: &TemplateParts) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| ComicError::Template(format!("unterminated placeholder in `{}`", template)))?;

        let value = match &after[..close] {
            "series" => &parts.series,
            "number" => &parts.number,
            "title" => &parts.title,
            "language" => &parts.language,
            other => return Err(ComicError::Template(format!("unknown placeholder `{{{}}}`", other))),
        };
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    let name = sanitize(&out);
    if name.is_empty() {
        return Err(ComicError::Template(format!("`{}` renders to an empty name", template)));
    }
    Ok(name)
}

/// 替换路径分隔符与保留字符，并压缩多余空白
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('.')
        .trim()
        .to_string()
}

fn padded_number(number: f64) -> String {
    let whole = number.trunc() as i64;
    let fraction = number - number.trunc();
    if fraction == 0.0 {
        format!("{:04}", whole)
    } else {
        let text = format!("{}", number);
        let decimals = text.split_once('.').map(|(_, d)| d).unwrap_or_default();
        format!("{:04}.{}", whole, decimals)
    }
}
