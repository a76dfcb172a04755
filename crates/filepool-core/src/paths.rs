//! On-disk layout of the pool.
//!
//! All helpers return paths relative to the engine's data root, as strings
//! with `/` separators. That relative form is what gets persisted in the
//! metadata store; adapters join it onto the configured data root when
//! touching the filesystem.

use crate::types::{FileId, SiteId};

/// Subdirectory of a site folder where pooled files live.
pub const FILEPOOL_FOLDER: &str = "filepool";

/// Folder holding everything belonging to one site.
#[must_use]
pub fn site_folder_path(site_id: &SiteId) -> String {
    site_id.as_str().to_string()
}

/// Folder holding the pooled files of one site.
#[must_use]
pub fn filepool_folder_path(site_id: &SiteId) -> String {
    format!("{}/{FILEPOOL_FOLDER}", site_id.as_str())
}

/// Path of a pooled file. The extension is appended when known so the
/// platform can open the file with the right handler.
#[must_use]
pub fn file_path(site_id: &SiteId, file_id: &FileId, extension: Option<&str>) -> String {
    let base = format!("{}/{}", filepool_folder_path(site_id), file_id.as_str());

    match extension {
        Some(ext) if !ext.is_empty() => format!("{base}.{ext}"),
        _ => base,
    }
}

/// Directory a package's files are unpacked into.
#[must_use]
pub fn package_dir_path(site_id: &SiteId, dir_name: &str) -> String {
    format!("{}/{dir_name}", filepool_folder_path(site_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let site = SiteId::new("school");
        let file = FileId::new("notes_0011223344556677");

        assert_eq!(site_folder_path(&site), "school");
        assert_eq!(filepool_folder_path(&site), "school/filepool");
        assert_eq!(
            file_path(&site, &file, Some("pdf")),
            "school/filepool/notes_0011223344556677.pdf"
        );
        assert_eq!(
            file_path(&site, &file, None),
            "school/filepool/notes_0011223344556677"
        );
        assert_eq!(
            package_dir_path(&site, "scorm_aabbccdd00112233"),
            "school/filepool/scorm_aabbccdd00112233"
        );
    }

    #[test]
    fn test_empty_extension_is_ignored() {
        let site = SiteId::new("school");
        let file = FileId::new("notes_0011223344556677");
        assert_eq!(
            file_path(&site, &file, Some("")),
            "school/filepool/notes_0011223344556677"
        );
    }
}
