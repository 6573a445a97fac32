//! ZIP 容器归档 (cbz / zip)

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::error::{ComicError, Result};
use crate::core::model::{DownloadedChapter, DownloadedFile};

use super::{Archiver, bundle_folders, entry_name, remove_partial};

/// cbz 与 zip 仅扩展名不同
pub struct ZipArchiver {
    extension: &'static str,
}

impl ZipArchiver {
    pub fn cbz() -> Self {
        Self { extension: "cbz" }
    }

    pub fn zip() -> Self {
        Self { extension: "zip" }
    }

    fn write_entries<'a>(
        &self,
        path: &Path,
        entries: impl Iterator<Item = (String, &'a DownloadedFile)>,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<()> {
        let mut writer = ZipWriter::new(File::create(path)?);
        // 图片本身已压缩
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for (name, file) in entries {
            writer.start_file(name, options)?;
            writer.write_all(&file.data)?;
            progress();
        }
        writer.finish()?;
        Ok(())
    }
}

impl Archiver for ZipArchiver {
    fn extension(&self) -> &'static str {
        self.extension
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

        let path = output_dir.join(format!("{}.{}", filename, self.extension));
        let entries = chapter.files.iter().enumerate().map(|(i, f)| (entry_name(i, f), f));
        if let Err(e) = self.write_entries(&path, entries, progress) {
            remove_partial(&path);
            return Err(e);
        }
        Ok(path)
    }

    fn archive_bundle(
        &self,
        output_dir: &Path,
        filename: &str,
        chapters: &[DownloadedChapter],
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf> {
        let path = output_dir.join(format!("{}.{}", filename, self.extension));
        let entries = chapters.iter().zip(bundle_folders(chapters)).flat_map(|(chapter, folder)| {
            chapter
                .files
                .iter()
                .enumerate()
                .map(move |(i, f)| (format!("{}/{}", folder, entry_name(i, f)), f))
        });
        if let Err(e) = self.write_entries(&path, entries, progress) {
            remove_partial(&path);
            return Err(e);
        }
        Ok(path)
    }
}
