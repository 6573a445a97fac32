//! 归档打包 (Packaging)
//!
//! 将按序排列的页面数据写为 cbz / zip / raw / epub 产物。归档器只按给定顺序写入，不重排。

pub mod cbz;
pub mod epub;
pub mod raw;
pub mod template;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strum::{Display, EnumString};
use tracing::debug;

use crate::core::error::{ComicError, Result};
use crate::core::model::{DownloadedChapter, DownloadedFile, format_number};

use self::cbz::ZipArchiver;
use self::epub::EpubArchiver;
use self::raw::RawArchiver;
use self::template::{TemplateParts, render};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ArchiveFormat {
    #[default]
    Cbz,
    Zip,
    Raw,
    Epub,
}

/// 归档器
pub trait Archiver: Send + Sync {
    fn extension(&self) -> &'static str;

    /// 打包单个章节，每写入一页回调一次 `progress`
    fn archive(
        &self,
        output_dir: &Path,
        filename: &str,
        chapter: &DownloadedChapter,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf>;

    /// 打包合集，每章一个子路径
    fn archive_bundle(
        &self,
        output_dir: &Path,
        filename: &str,
        chapters: &[DownloadedChapter],
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf>;
}

pub fn new_archiver(format: ArchiveFormat) -> Box<dyn Archiver> {
    match format {
        ArchiveFormat::Cbz => Box::new(ZipArchiver::cbz()),
        ArchiveFormat::Zip => Box::new(ZipArchiver::zip()),
        ArchiveFormat::Raw => Box::new(RawArchiver),
        ArchiveFormat::Epub => Box::new(EpubArchiver),
    }
}

/// 打包参数
#[derive(Debug, Clone)]
pub struct PackTarget<'a> {
    pub output_dir: &'a Path,
    pub template: &'a str,
    pub series: &'a str,
    pub format: ArchiveFormat,
}

/// 按文件名模板打包单个章节
pub fn pack_single(
    target: &PackTarget<'_>,
    chapter: &DownloadedChapter,
    progress: &(dyn Fn() + Send + Sync),
) -> Result<PathBuf> {
    let parts = TemplateParts::for_chapter(target.series, &chapter.chapter);
    let filename = render(target.template, &parts)?;
    new_archiver(target.format).archive(target.output_dir, &filename, chapter, progress)
}

/// 打包合集，文件名使用用户输入的原始区间表达式
pub fn pack_bundle(
    target: &PackTarget<'_>,
    chapters: &[DownloadedChapter],
    range: &str,
    progress: &(dyn Fn() + Send + Sync),
) -> Result<PathBuf> {
    if chapters.is_empty() {
        return Err(ComicError::NothingToBundle);
    }
    let parts = TemplateParts::for_bundle(target.series, range);
    let filename = render(target.template, &parts)?;
    new_archiver(target.format).archive_bundle(target.output_dir, &filename, chapters, progress)
}

/// 归档内条目名: 以位置编号，从 001 开始
pub(crate) fn entry_name(index: usize, file: &DownloadedFile) -> String {
    format!("{:03}.{}", index + 1, file.extension)
}

/// 合集内章节目录名，整数部分补零至两位 (Chapter 05, Chapter 10.5)
pub(crate) fn chapter_folder(number: f64) -> String {
    let text = format_number(number);
    match text.split_once('.') {
        Some((whole, fraction)) => format!("Chapter {:0>2}.{}", whole, fraction),
        None => format!("Chapter {:0>2}", text),
    }
}

/// 合集内各章节的目录名，同号章节依次追加 " (2)"、" (3)"
pub(crate) fn bundle_folders(chapters: &[DownloadedChapter]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    chapters
        .iter()
        .map(|c| {
            let base = chapter_folder(c.chapter.number);
            let count = seen.entry(base.clone()).or_default();
            *count += 1;
            if *count == 1 { base } else { format!("{} ({})", base, count) }
        })
        .collect()
}

/// 清理写入失败留下的残缺产物
pub(crate) fn remove_partial(path: &Path) {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = removed {
        debug!("清理残缺产物失败 {:?}: {}", path, e);
    }
}
