use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::translation::segmenter::visible_text;

// @module: File and directory utilities for chapter import and export

/// Extensions recognized as chapter documents
pub const CHAPTER_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "md", "txt"];

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<h[1-3](?:\s[^>]*)?>(.*?)</h[1-3]>").unwrap());
static MARKDOWN_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,3}\s+(.+?)\s*$").unwrap());
static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// A chapter document found on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterSource {
    pub path: PathBuf,
    /// 1-based position in file name order
    pub ordinal: i64,
    /// Slug of the file stem
    pub slug: String,
    pub title: String,
    pub markup: String,
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    // @generates: Output path for an exported translation
    // @params: input_name, output_dir, target_language, extension
    pub fn generate_output_path<P: AsRef<Path>>(
        input_name: &str,
        output_dir: P,
        target_language: &str,
        extension: &str,
    ) -> PathBuf {
        output_dir
            .as_ref()
            .join(format!("{}.{}.{}", input_name, target_language, extension))
    }

    /// Chapter documents under a directory, sorted by path
    pub fn find_chapter_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();

        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() && is_chapter_file(path) {
                result.push(path.to_path_buf());
            }
        }

        result.sort();
        Ok(result)
    }

    /// Read every chapter document of a directory
    pub fn collect_chapters<P: AsRef<Path>>(dir: P) -> Result<Vec<ChapterSource>> {
        let dir = dir.as_ref();
        if !Self::dir_exists(dir) {
            return Err(anyhow::anyhow!("Directory does not exist: {:?}", dir));
        }

        Self::find_chapter_files(dir)?
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let markup = Self::read_to_string(&path)?;
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let title = extract_title(&markup).unwrap_or_else(|| title_from_stem(&stem));

                Ok(ChapterSource {
                    ordinal: index as i64 + 1,
                    slug: slugify(&stem),
                    title,
                    markup,
                    path,
                })
            })
            .collect()
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content).with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }
}

fn is_chapter_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            CHAPTER_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// First heading of an HTML or Markdown document
pub fn extract_title(markup: &str) -> Option<String> {
    let raw = HEADING
        .captures(markup)
        .map(|c| visible_text(&c[1]))
        .or_else(|| MARKDOWN_HEADING.captures(markup).map(|c| c[1].to_string()))?;

    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() { None } else { Some(title) }
}

fn title_from_stem(stem: &str) -> String {
    stem.replace(['_', '-'], " ").trim().to_string()
}

/// Lowercase ASCII slug; runs of other characters become one dash
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    NON_SLUG.replace_all(&lower, "-").trim_matches('-').to_string()
}
