//! File format detection and ranking

/// Fallback formats, most preferred first, after the target format
pub const FALLBACK_ORDER: &[&str] = &["mobi", "azw3", "azw", "pdf", "txt", "rtf", "html", "htm", "lit", "doc", "docx", "fb2"];

/// Archive extensions whose inner extension decides the format; only zip
/// can be unpacked after transfer
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// Placeholder format for names without a usable extension
pub const UNKNOWN_FORMAT: &str = "unknown";

/// Format derived from a filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFormat {
    /// Lower-cased extension without the dot
    pub extension: String,
    /// The book is wrapped in an archive (`name.epub.zip`)
    pub archived: bool,
}

impl FileFormat {
    /// Derive the format from a filename, case-insensitively
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.trim().to_ascii_lowercase();
        let Some((stem, ext)) = split_extension(&lower) else {
            return Self { extension: UNKNOWN_FORMAT.to_string(), archived: false };
        };

        if ARCHIVE_EXTENSIONS.contains(&ext) {
            if let Some((_, inner)) = split_extension(stem) {
                return Self { extension: inner.to_string(), archived: true };
            }
        }
        Self { extension: ext.to_string(), archived: false }
    }

    /// Whether this is the wanted format, archived or not
    pub fn is_target(&self, target: &str) -> bool {
        self.extension.eq_ignore_ascii_case(target)
    }

    /// Priority score, lower is preferred
    pub fn priority(&self, target: &str) -> u8 {
        format_priority(&self.extension, target)
    }
}

/// Rank an extension: the target is 1, then the fallback order, unknown last
pub fn format_priority(extension: &str, target: &str) -> u8 {
    if extension.eq_ignore_ascii_case(target) {
        return 1;
    }
    FALLBACK_ORDER
        .iter()
        .filter(|f| !f.eq_ignore_ascii_case(target))
        .position(|f| f.eq_ignore_ascii_case(extension))
        .map(|i| i as u8 + 2)
        .unwrap_or(FALLBACK_ORDER.len() as u8 + 2)
}

/// Strip every format extension (`book.epub.zip` -> `book`)
pub fn strip_extensions(filename: &str) -> &str {
    let mut name = filename;
    for _ in 0..2 {
        match split_extension(name) {
            Some((stem, _)) => name = stem,
            None => break,
        }
    }
    name
}

/// Split on the last dot when what follows looks like an extension
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let plausible = !stem.is_empty()
        && (1..=5).contains(&ext.len())
        && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        && ext.bytes().any(|b| b.is_ascii_alphabetic());
    plausible.then_some((stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_filename() {
        assert_eq!(FileFormat::from_filename("Book.EPUB").extension, "epub");
        let zipped = FileFormat::from_filename("Jane Doe - Book.epub.zip");
        assert_eq!(zipped.extension, "epub");
        assert!(zipped.archived);
        assert_eq!(FileFormat::from_filename("bundle.zip").extension, "zip");
        let rar = FileFormat::from_filename("Example Book.epub.rar");
        assert_eq!(rar.extension, "rar");
        assert!(!rar.archived);
        assert!(!rar.is_target("epub"));
        assert!(zipped.is_target("EPUB"));
        assert_eq!(FileFormat::from_filename("no extension").extension, UNKNOWN_FORMAT);
        assert_eq!(FileFormat::from_filename("Book v1.5").extension, UNKNOWN_FORMAT);
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(format_priority("epub", "epub"), 1);
        assert_eq!(format_priority("mobi", "epub"), 2);
        assert_eq!(format_priority("azw3", "epub"), 3);
        assert!(format_priority("pdf", "epub") < format_priority("txt", "epub"));
        assert!(format_priority("fb2", "epub") < format_priority("exe", "epub"));
        assert_eq!(format_priority("exe", "epub"), format_priority("unknown", "epub"));
    }

    #[test]
    fn test_priority_with_other_target() {
        assert_eq!(format_priority("mobi", "mobi"), 1);
        // mobi no longer occupies a fallback slot
        assert_eq!(format_priority("azw3", "mobi"), 2);
    }

    #[test]
    fn test_strip_extensions() {
        assert_eq!(strip_extensions("Jane Doe - Book.epub.zip"), "Jane Doe - Book");
        assert_eq!(strip_extensions("Book.epub"), "Book");
        assert_eq!(strip_extensions("Book"), "Book");
    }
}
