// src/matcher.rs - Decides whether a requested file is already staged on the printer
use crate::printer_api::RemoteFileDescriptor;

/// Separator between the segments of a staged filename.
pub const NAME_DELIMITER: &str = "-@-";

/// A printer file whose second segment carries the requested file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub filename: String,
    pub prefix: String,
}

/// First listed file whose second delimited segment equals `file_key`.
/// Listing order is preserved.
pub fn find_staged(files: &[RemoteFileDescriptor], file_key: &str) -> Option<StagedFile> {
    files.iter().find_map(|file| {
        let mut parts = file.filename.split(NAME_DELIMITER);
        let prefix = parts.next()?;
        match parts.next() {
            Some(key) if key == file_key => Some(StagedFile {
                filename: file.filename.clone(),
                prefix: prefix.to_string(),
            }),
            _ => None,
        }
    })
}

/// `{prefix}-@-{job_uuid}-@-{file_key}.gcode`
pub fn staged_name(prefix: &str, job_uuid: &str, file_key: &str) -> String {
    format!(
        "{}{}{}{}{}.gcode",
        prefix, NAME_DELIMITER, job_uuid, NAME_DELIMITER, file_key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(names: &[&str]) -> Vec<RemoteFileDescriptor> {
        names
            .iter()
            .map(|name| RemoteFileDescriptor { filename: name.to_string() })
            .collect()
    }

    #[test]
    fn matches_second_segment() {
        let files = listing(&["other.gcode", "foo-@-ABC123"]);
        let staged = find_staged(&files, "ABC123").unwrap();
        assert_eq!(staged.filename, "foo-@-ABC123");
        assert_eq!(staged.prefix, "foo");
        assert_eq!(staged_name(&staged.prefix, "job-7", "ABC123"), "foo-@-job-7-@-ABC123.gcode");
    }

    #[test]
    fn previously_renamed_files_do_not_match_on_key_segment() {
        // The key sits in the third segment after a rename, so only the second segment counts.
        let files = listing(&["foo-@-job-1-@-ABC123.gcode"]);
        assert!(find_staged(&files, "ABC123").is_none());
        assert!(find_staged(&files, "job-1").is_some());
    }

    #[test]
    fn first_hit_wins_in_listing_order() {
        let files = listing(&["zeta-@-K", "alpha-@-K"]);
        assert_eq!(find_staged(&files, "K").unwrap().prefix, "zeta");
    }

    #[test]
    fn undelimited_names_never_match() {
        let files = listing(&["ABC123", "ABC123.gcode"]);
        assert!(find_staged(&files, "ABC123").is_none());
        assert!(find_staged(&[], "ABC123").is_none());
    }
}
