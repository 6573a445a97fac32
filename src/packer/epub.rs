//! EPUB 编译 (EPUB Compilation)
//!
//! 将图片序列包装为纯图片 EPUB：每张图片一个 XHTML 页面，合集模式下每章一个目录项。

use std::fs::File;
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, ZipLibrary};
use mime_guess::MimeGuess;

use crate::core::error::{ComicError, Result};
use crate::core::model::{DownloadedChapter, DownloadedFile, format_number};

use super::{Archiver, remove_partial};

const TEXT_DIR: &str = "Text";
const IMAGE_DIR: &str = "Images";

pub struct EpubArchiver;

fn epub_err(e: impl std::fmt::Display) -> ComicError {
    ComicError::Epub(e.to_string())
}

/// 逐步组装的 EPUB 文档
struct ImageBook {
    builder: EpubBuilder<ZipLibrary>,
    language: String,
    counter: usize,
}

impl ImageBook {
    fn new(title: &str, language: &str) -> Result<Self> {
        let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(epub_err)?).map_err(epub_err)?;
        let language = if language.is_empty() { "en" } else { language }.to_string();
        builder.set_title(title);
        builder.add_language(language.as_str());
        Ok(Self {
            builder,
            language,
            counter: 0,
        })
    }

    /// 追加一组图片；`heading` 非空时第一页进入目录
    fn add_images(
        &mut self,
        heading: Option<&str>,
        files: &[DownloadedFile],
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        for (i, file) in files.iter().enumerate() {
            self.counter += 1;
            let image = format!("{}/{:05}.{}", IMAGE_DIR, self.counter, file.extension);
            let page = format!("{}/{:05}.xhtml", TEXT_DIR, self.counter);
            let mime = MimeGuess::from_ext(&file.extension)
                .first_raw()
                .unwrap_or("image/jpeg");

            self.builder
                .add_resource(&image, file.data.as_ref(), mime)
                .map_err(epub_err)?;

            let xhtml = self.wrap_html(heading.unwrap_or_default(), &format!("../{}", image));
            let mut content = EpubContent::new(&page, xhtml.as_bytes());
            if i == 0
                && let Some(title) = heading
            {
                content = content.title(title).level(1);
            }
            self.builder.add_content(content).map_err(epub_err)?;
            progress();
        }
        Ok(())
    }

    fn write(self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        if let Err(e) = self.builder.generate(file) {
            remove_partial(path);
            return Err(epub_err(e));
        }
        Ok(())
    }

    /// 应用 XHTML 1.1 标准模板包装
    fn wrap_html(&self, title: &str, src: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{}">
<head>
    <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8" />
    <title>{}</title>
    <style>body {{ margin: 0; text-align: center; }} img {{ max-width: 100%; }}</style>
</head>
<body>
<div><img src="{}" alt="" /></div>
</body>
</html>"#,
            self.language,
            escape(title),
            src
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Archiver for EpubArchiver {
    fn extension(&self) -> &'static str {
        "epub"
    }

    fn archive(
        &self,
        output_dir: &Path,
        filename: &str,
        chapter: &DownloadedChapter,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf> {
        if chapter.files.is_empty() {
            return Err(ComicError::EmptyChapter);
        }
        let path = output_dir.join(format!("{}.epub", filename));
        let mut book = ImageBook::new(filename, &chapter.chapter.language)?;
        book.add_images(Some(filename), &chapter.files, progress)?;
        book.write(&path)?;
        Ok(path)
    }

    fn archive_bundle(
        &self,
        output_dir: &Path,
        filename: &str,
        chapters: &[DownloadedChapter],
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf> {
        let path = output_dir.join(format!("{}.epub", filename));
        let language = chapters.first().map(|c| c.chapter.language.as_str()).unwrap_or_default();
        let mut book = ImageBook::new(filename, language)?;

        for chapter in chapters {
            let heading = if chapter.chapter.title.is_empty() {
                format!("Chapter {}", format_number(chapter.chapter.number))
            } else {
                chapter.chapter.title.clone()
            };
            book.add_images(Some(&heading), &chapter.files, progress)?;
        }

        book.write(&path)?;
        Ok(path)
    }
}
