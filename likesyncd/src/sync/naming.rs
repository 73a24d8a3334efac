use std::path::{Path, PathBuf};

use thiserror::Error;

const ILLEGAL_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("track name is empty after sanitization")]
    Empty,
}

/// Replaces every character that is illegal in a file name with `_`, then
/// trims surrounding whitespace.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `"<title> - <artist>"`, the stem every acquired file is stored under.
pub fn base_name(title: &str, artist: &str) -> Result<String, NamingError> {
    let title = sanitize(title);
    let artist = sanitize(artist);
    if title.is_empty() && artist.is_empty() {
        return Err(NamingError::Empty);
    }
    Ok(format!("{title} - {artist}"))
}

pub fn file_name(title: &str, artist: &str, extension: &str) -> Result<String, NamingError> {
    Ok(format!("{}.{extension}", base_name(title, artist)?))
}

pub fn track_path_for(
    library_root: &Path,
    title: &str,
    artist: &str,
    extension: &str,
) -> Result<PathBuf, NamingError> {
    Ok(library_root.join(file_name(title, artist, extension)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_each_illegal_char_one_for_one() {
        assert_eq!(sanitize("<>:\"/\\|?*"), "_________");
    }

    #[test]
    fn sanitize_is_deterministic() {
        let first = sanitize("AC/DC: Back?");
        let second = sanitize("AC/DC: Back?");
        assert_eq!(first, second);
        assert_eq!(first, "AC_DC_ Back_");
    }

    #[test]
    fn trims_after_replacing() {
        assert_eq!(sanitize("  Song  "), "Song");
        assert_eq!(sanitize(" ? "), "_");
    }

    #[test]
    fn keeps_unicode_and_dots() {
        assert_eq!(sanitize("Mr. Brightside"), "Mr. Brightside");
        assert_eq!(sanitize("Déjà vu"), "Déjà vu");
    }

    #[test]
    fn maps_track_under_library_root() {
        let root = PathBuf::from("/music");
        let mapped = track_path_for(&root, "Back In Black", "AC/DC", "mp3").unwrap();
        assert_eq!(mapped, PathBuf::from("/music/Back In Black - AC_DC.mp3"));
    }

    #[test]
    fn rejects_blank_title_and_artist() {
        assert_eq!(base_name("  ", ""), Err(NamingError::Empty));
        assert_eq!(base_name("", "Artist").unwrap(), " - Artist");
    }
}
