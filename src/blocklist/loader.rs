//! Local filter list files.

use std::io;
use std::path::{Path, PathBuf};

use super::parse_in_background;
use crate::filter::{ParseError, ParsedFilter};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("filter list {0:?} does not exist")]
    Missing(PathBuf),

    #[error("failed to read filter list {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("filter list is not valid UTF-8: {0:?}")]
    Encoding(PathBuf),

    #[error("parse error")]
    Parse(#[from] ParseError),

    #[error("task join error")]
    Join(#[from] tokio::task::JoinError),
}

/// Reads filter lists stored on disk.
pub struct FileLoader;

impl FileLoader {
    /// Read and parse the list at `path`.
    ///
    /// A leading byte order mark is ignored. Parsing happens on the
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Missing`] when there is no file at `path`, and
    /// [`LoadError::Read`] or [`LoadError::Encoding`] when it cannot be read
    /// as text.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use netsieve::blocklist::loader::FileLoader;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let filters = FileLoader::load(Path::new("/etc/netsieve/easylist.txt")).await?;
    /// println!("{} filters", filters.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load(path: &Path) -> Result<Vec<ParsedFilter>, LoadError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut content =
            String::from_utf8(bytes).map_err(|_| LoadError::Encoding(path.to_path_buf()))?;
        if content.starts_with('\u{feff}') {
            content.drain(..'\u{feff}'.len_utf8());
        }

        let filters = parse_in_background(content).await??;
        tracing::debug!(path = ?path, count = filters.len(), "parsed filter list file");
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterCategory, FilterTag};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn list(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn should_tag_filters_by_category() {
        let file = list(
            b"[Adblock Plus 2.0]\n\
              ! Title: test list\n\
              ||ads.example.com^\n\
              @@||ads.example.com/allowed.js\n\
              example.com##.banner\n\
              ||ads.example.com^$badfilter\n",
        );

        let filters = FileLoader::load(file.path()).await.unwrap();

        let tags: Vec<_> = filters.iter().map(|filter| filter.tag).collect();
        assert_eq!(
            tags,
            vec![
                FilterTag::Active(FilterCategory::Deny),
                FilterTag::Active(FilterCategory::Allow),
                FilterTag::BadFilter(FilterCategory::Deny),
            ]
        );
    }

    #[tokio::test]
    async fn should_skip_byte_order_mark_and_crlf() {
        let file = list(b"\xef\xbb\xbf||a.com^\r\n||b.com^\n||c.com^\r\n");

        let filters = FileLoader::load(file.path()).await.unwrap();

        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0].entry.pattern.to_string(), "a.com");
    }

    #[tokio::test]
    async fn should_report_missing_file() {
        let result = FileLoader::load(Path::new("/nonexistent/lists/easylist.txt")).await;

        assert!(matches!(result, Err(LoadError::Missing(_))));
    }

    #[tokio::test]
    async fn should_reject_binary_content() {
        let file = list(&[0xff, 0xfe, 0x00, 0x41]);

        let result = FileLoader::load(file.path()).await;

        assert!(matches!(result, Err(LoadError::Encoding(_))));
    }

    #[tokio::test]
    async fn should_parse_large_list() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..10_000 {
            writeln!(file, "||tracker{i}.example.com^$third-party").unwrap();
        }
        file.flush().unwrap();

        let filters = FileLoader::load(file.path()).await.unwrap();

        assert_eq!(filters.len(), 10_000);
    }
}
