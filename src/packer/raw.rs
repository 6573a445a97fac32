//! 原始目录输出 (raw)

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{ComicError, Result};
use crate::core::model::{DownloadedChapter, DownloadedFile};

use super::{Archiver, bundle_folders, entry_name, remove_partial};

pub struct RawArchiver;

fn write_folder(folder: &Path, files: &[DownloadedFile], progress: &(dyn Fn() + Send + Sync)) -> Result<()> {
    fs::create_dir_all(folder)?;
    for (i, file) in files.iter().enumerate() {
        fs::write(folder.join(entry_name(i, file)), &file.data)?;
        progress();
    }
    Ok(())
}

impl Archiver for RawArchiver {
    fn extension(&self) -> &'static str {
        "raw"
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
        let folder = output_dir.join(format!("{}_raw", filename));
        write_folder(&folder, &chapter.files, progress)?;
        Ok(folder)
    }

    fn archive_bundle(
        &self,
        output_dir: &Path,
        filename: &str,
        chapters: &[DownloadedChapter],
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<PathBuf> {
        let root = output_dir.join(format!("{}_bundle", filename));
        let written = chapters
            .iter()
            .zip(bundle_folders(chapters))
            .try_for_each(|(chapter, folder)| write_folder(&root.join(folder), &chapter.files, progress));

        if let Err(e) = written {
            remove_partial(&root);
            return Err(e);
        }
        Ok(root)
    }
}
