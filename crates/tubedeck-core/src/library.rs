//! Local music library management.
//!
//! The library is a single directory tree. Downloads land in its root and
//! deleted files go to a `trash` folder inside it, from where they can be
//! restored or purged. Every path handed to the library is resolved against
//! the root and rejected if it escapes it.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, ErrorContext, FileSystemError, LibraryError, Result};
use crate::metadata::extract_metadata;

/// Audio file extensions the library recognises.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a", "aac", "webm"];

/// Name of the trash folder inside the library root.
pub const TRASH_DIR_NAME: &str = "trash";

/// Check if a path has a supported audio extension.
#[must_use]
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// MIME type used when streaming a file to a browser.
#[must_use]
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("webm") => "audio/webm",
        Some("mp4") => "video/mp4",
        _ => "audio/mpeg",
    }
}

/// Format seconds as `MM:SS` (`00:00` for zero or negative input).
#[must_use]
pub fn format_time(seconds: f64) -> String {
    if seconds <= 0.0 || !seconds.is_finite() {
        return "00:00".to_string();
    }
    let total = seconds as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Format a byte count as `B`/`KB`/`MB`/`GB` with one decimal.
#[must_use]
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// A playable file in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the library root, with `/` separators.
    pub relative_path: String,
    /// File name.
    pub file_name: String,
    /// Title tag, or the file stem.
    pub title: String,
    /// Artist tag, or "Unknown Artist".
    pub artist: String,
    /// Album tag, or "Unknown Album".
    pub album: String,
    /// Duration in seconds (0 when unknown).
    pub duration_secs: f64,
    /// File size in bytes.
    pub file_size: u64,
}

impl Song {
    /// Read a song from disk. `root` is used for the relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn from_path(path: &Path, root: &Path) -> Result<Self> {
        let file_size = fs::metadata(path).read_context(path)?.len();
        let metadata = extract_metadata(path)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());

        Ok(Self {
            relative_path: relative_path(path, root),
            file_name,
            title: metadata.title.clone().unwrap_or(stem),
            artist: metadata.display_artist().to_string(),
            album: metadata.display_album().to_string(),
            duration_secs: metadata.duration_secs.unwrap_or(0.0),
            file_size,
            path: path.to_path_buf(),
        })
    }

    /// Duration as `MM:SS`.
    #[must_use]
    pub fn duration_str(&self) -> String {
        format_time(self.duration_secs)
    }

    /// File size as a human-readable string.
    #[must_use]
    pub fn size_str(&self) -> String {
        format_file_size(self.file_size)
    }

    /// MIME type for streaming.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.path)
    }
}

fn relative_path(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Totals for the library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    /// Number of playable files.
    pub total_files: usize,
    /// Combined size in bytes.
    pub total_size_bytes: u64,
    /// Combined duration in seconds.
    pub total_duration_secs: f64,
    /// Size as a human-readable string.
    pub total_size: String,
    /// Duration as `MM:SS`.
    pub total_duration: String,
}

impl LibraryStats {
    /// Compute totals for a set of songs.
    #[must_use]
    pub fn from_songs(songs: &[Song]) -> Self {
        let total_size_bytes = songs.iter().map(|s| s.file_size).sum();
        let total_duration_secs = songs.iter().map(|s| s.duration_secs).sum();
        Self {
            total_files: songs.len(),
            total_size_bytes,
            total_duration_secs,
            total_size: format_file_size(total_size_bytes),
            total_duration: format_time(total_duration_secs),
        }
    }
}

/// A file sitting in the trash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashEntry {
    /// File name inside the trash folder.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Size as a human-readable string.
    pub size: String,
    /// When the file was trashed (unix seconds).
    pub trashed_at: i64,
}

/// The music folder.
#[derive(Debug, Clone)]
pub struct MusicLibrary {
    root: PathBuf,
}

impl MusicLibrary {
    /// Open the library at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or resolved.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: root.clone(),
                    reason: e.to_string(),
                })
            })?;
            info!("Created music library at {}", root.display());
        }
        let root = root.canonicalize().read_context(&root)?;
        Ok(Self { root })
    }

    /// Library root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Trash folder.
    #[must_use]
    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR_NAME)
    }

    /// All playable files, sorted case-insensitively by file name.
    ///
    /// The trash folder is skipped. Files that cannot be read are logged and
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be read.
    pub fn scan(&self) -> Result<Vec<Song>> {
        fs::read_dir(&self.root).read_context(&self.root)?;
        let trash = self.trash_dir();

        let mut songs: Vec<Song> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.path() != trash)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable library entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
            .filter_map(|e| match Song::from_path(e.path(), &self.root) {
                Ok(song) => Some(song),
                Err(err) => {
                    warn!("Skipping {}: {}", e.path().display(), err);
                    None
                }
            })
            .collect();

        songs.sort_by_key(|s| s.file_name.to_lowercase());
        debug!("Scanned {} songs in {}", songs.len(), self.root.display());
        Ok(songs)
    }

    /// Information about one file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is outside the library, missing or not
    /// an audio file.
    pub fn song(&self, path: &Path) -> Result<Song> {
        let path = self.resolve(path)?;
        Song::from_path(&path, &self.root)
    }

    /// Library totals.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be scanned.
    pub fn stats(&self) -> Result<LibraryStats> {
        Ok(LibraryStats::from_songs(&self.scan()?))
    }

    /// Resolve a library path (relative to the root, or absolute inside it)
    /// to an existing audio file outside the trash.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::OutsideLibrary`] for paths escaping the root or in the trash
    /// - [`LibraryError::FileNotFound`] if nothing exists there
    /// - [`LibraryError::UnsupportedFile`] for non-audio files
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(Error::Library(LibraryError::OutsideLibrary {
                    path: path.to_path_buf(),
                }));
            }
            self.root.join(path)
        };

        let resolved = candidate.canonicalize().map_err(|_| {
            Error::Library(LibraryError::FileNotFound {
                path: path.to_path_buf(),
            })
        })?;

        if !resolved.starts_with(&self.root) || resolved.starts_with(self.trash_dir()) {
            return Err(Error::Library(LibraryError::OutsideLibrary {
                path: path.to_path_buf(),
            }));
        }
        if !resolved.is_file() || !is_audio_file(&resolved) {
            return Err(Error::Library(LibraryError::UnsupportedFile {
                path: path.to_path_buf(),
            }));
        }
        Ok(resolved)
    }

    /// Delete a file permanently.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the file cannot be removed.
    pub fn delete(&self, path: &Path) -> Result<()> {
        let path = self.resolve(path)?;
        fs::remove_file(&path).delete_context(&path)?;
        info!("Deleted {}", path.display());
        Ok(())
    }

    /// Move a file into the trash, returning its trash file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the move fails.
    pub fn move_to_trash(&self, path: &Path) -> Result<String> {
        let source = self.resolve(path)?;
        let trash = self.trash_dir();
        fs::create_dir_all(&trash).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: trash.clone(),
                reason: e.to_string(),
            })
        })?;

        let dest = unique_destination(&trash, &source);
        move_file(&source, &dest)?;
        // mtime records when the file was trashed
        if let Err(e) = filetime::set_file_mtime(&dest, FileTime::now()) {
            debug!("Could not stamp trash time on {}: {}", dest.display(), e);
        }

        let name = file_name_string(&dest);
        info!("Moved {} to trash as {}", source.display(), name);
        Ok(name)
    }

    /// Files in the trash, most recently trashed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the trash folder exists but cannot be read.
    pub fn list_trash(&self) -> Result<Vec<TrashEntry>> {
        let trash = self.trash_dir();
        if !trash.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&trash).read_context(&trash)? {
            let entry = entry.read_context(&trash)?;
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            entries.push(TrashEntry {
                name: file_name_string(&path),
                size_bytes: meta.len(),
                size: format_file_size(meta.len()),
                trashed_at: FileTime::from_last_modification_time(&meta).unix_seconds(),
            });
        }

        entries.sort_by(|a, b| b.trashed_at.cmp(&a.trashed_at).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Move a trashed file back into the library root.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, missing, or the move fails.
    pub fn restore(&self, name: &str) -> Result<PathBuf> {
        let source = self.trash_path(name)?;
        let dest = unique_destination(&self.root, &source);
        move_file(&source, &dest)?;
        info!("Restored {} to {}", name, dest.display());
        Ok(dest)
    }

    /// Delete a trashed file permanently.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, missing, or removal fails.
    pub fn delete_from_trash(&self, name: &str) -> Result<()> {
        let path = self.trash_path(name)?;
        fs::remove_file(&path).delete_context(&path)?;
        info!("Permanently deleted {} from trash", name);
        Ok(())
    }

    /// Delete everything in the trash, returning how many files were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the trash cannot be read or a file cannot be removed.
    pub fn empty_trash(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list_trash()? {
            let path = self.trash_dir().join(&entry.name);
            fs::remove_file(&path).delete_context(&path)?;
            removed += 1;
        }
        info!("Emptied trash ({} files)", removed);
        Ok(removed)
    }

    fn trash_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        let is_plain_name = candidate.components().count() == 1
            && matches!(candidate.components().next(), Some(Component::Normal(_)));
        if !is_plain_name {
            return Err(Error::Library(LibraryError::OutsideLibrary {
                path: candidate.to_path_buf(),
            }));
        }

        let path = self.trash_dir().join(name);
        if !path.is_file() {
            return Err(Error::Library(LibraryError::NotInTrash {
                name: name.to_string(),
            }));
        }
        Ok(path)
    }
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `dir/<name>`, or `dir/<stem>_<unix time><ext>` when that is taken.
fn unique_destination(dir: &Path, source: &Path) -> PathBuf {
    let name = file_name_string(source);
    let dest = dir.join(&name);
    if !dest.exists() {
        return dest;
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.clone());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut dest = dir.join(format!("{stem}_{timestamp}{ext}"));
    let mut counter = 1;
    while dest.exists() {
        dest = dir.join(format!("{stem}_{timestamp}_{counter}{ext}"));
        counter += 1;
    }
    dest
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(from, to)
        .and_then(|_| fs::remove_file(from))
        .map_err(|e| {
            Error::FileSystem(FileSystemError::MoveFailed {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                reason: e.to_string(),
            })
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_library() -> (MusicLibrary, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let library = MusicLibrary::new(temp_dir.path().join("music")).expect("library");
        (library, temp_dir)
    }

    fn touch(library: &MusicLibrary, rel: &str, content: &[u8]) -> PathBuf {
        let path = library.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_format_time() {
            assert_eq!(format_time(0.0), "00:00");
            assert_eq!(format_time(-3.0), "00:00");
            assert_eq!(format_time(65.9), "01:05");
            assert_eq!(format_time(3600.0), "60:00");
        }

        #[test]
        fn test_format_file_size() {
            assert_eq!(format_file_size(0), "0 B");
            assert_eq!(format_file_size(500), "500.0 B");
            assert_eq!(format_file_size(1536), "1.5 KB");
            assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
            assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
            assert_eq!(format_file_size(2048 * 1024 * 1024 * 1024), "2048.0 GB");
        }

        #[test]
        fn test_mime_types() {
            assert_eq!(mime_type_for(Path::new("a.mp3")), "audio/mpeg");
            assert_eq!(mime_type_for(Path::new("a.WAV")), "audio/wav");
            assert_eq!(mime_type_for(Path::new("a.m4a")), "audio/mp4");
            assert_eq!(mime_type_for(Path::new("a.aac")), "audio/aac");
            assert_eq!(mime_type_for(Path::new("a.mp4")), "video/mp4");
            assert_eq!(mime_type_for(Path::new("a.xyz")), "audio/mpeg");
        }

        #[test]
        fn test_is_audio_file() {
            assert!(is_audio_file(Path::new("song.MP3")));
            assert!(is_audio_file(Path::new("song.webm")));
            assert!(!is_audio_file(Path::new("video.mp4")));
            assert!(!is_audio_file(Path::new("notes.txt")));
            assert!(!is_audio_file(Path::new("noext")));
        }
    }

    mod scan_tests {
        use super::*;

        #[test]
        fn test_scan_sorted_and_filtered() {
            let (library, _temp) = setup_library();
            touch(&library, "b.mp3", b"x");
            touch(&library, "A.wav", b"x");
            touch(&library, "sub/c.flac", b"x");
            touch(&library, "notes.txt", b"x");
            touch(&library, "trash/old.mp3", b"x");

            let songs = library.scan().expect("scan");
            let names: Vec<_> = songs.iter().map(|s| s.file_name.as_str()).collect();
            assert_eq!(names, vec!["A.wav", "b.mp3", "c.flac"]);
            assert_eq!(songs[2].relative_path, "sub/c.flac");
        }

        #[test]
        fn test_song_fallbacks() {
            let (library, _temp) = setup_library();
            touch(&library, "Untagged Song.mp3", b"garbage");

            let song = library.song(Path::new("Untagged Song.mp3")).expect("song");
            assert_eq!(song.title, "Untagged Song");
            assert_eq!(song.artist, "Unknown Artist");
            assert_eq!(song.album, "Unknown Album");
            assert_eq!(song.duration_str(), "00:00");
            assert_eq!(song.file_size, 7);
        }

        #[test]
        fn test_stats() {
            let (library, _temp) = setup_library();
            touch(&library, "a.mp3", &[0; 1024]);
            touch(&library, "b.mp3", &[0; 512]);

            let stats = library.stats().expect("stats");
            assert_eq!(stats.total_files, 2);
            assert_eq!(stats.total_size_bytes, 1536);
            assert_eq!(stats.total_size, "1.5 KB");
        }

        #[test]
        fn test_empty_library_stats() {
            let (library, _temp) = setup_library();
            let stats = library.stats().expect("stats");
            assert_eq!(stats.total_files, 0);
            assert_eq!(stats.total_size, "0 B");
            assert_eq!(stats.total_duration, "00:00");
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn test_resolve_rejects_traversal() {
            let (library, temp) = setup_library();
            fs::write(temp.path().join("outside.mp3"), b"x").unwrap();

            let err = library.resolve(Path::new("../outside.mp3")).unwrap_err();
            assert!(matches!(
                err,
                Error::Library(LibraryError::OutsideLibrary { .. })
            ));

            let err = library
                .resolve(&temp.path().join("outside.mp3"))
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Library(LibraryError::OutsideLibrary { .. })
            ));
        }

        #[test]
        fn test_resolve_missing_and_unsupported() {
            let (library, _temp) = setup_library();
            touch(&library, "notes.txt", b"x");

            assert!(matches!(
                library.resolve(Path::new("nope.mp3")).unwrap_err(),
                Error::Library(LibraryError::FileNotFound { .. })
            ));
            assert!(matches!(
                library.resolve(Path::new("notes.txt")).unwrap_err(),
                Error::Library(LibraryError::UnsupportedFile { .. })
            ));
        }

        #[test]
        fn test_resolve_rejects_trash() {
            let (library, _temp) = setup_library();
            touch(&library, "trash/old.mp3", b"x");
            assert!(library.resolve(Path::new("trash/old.mp3")).is_err());
        }
    }

    mod trash_tests {
        use super::*;

        #[test]
        fn test_delete() {
            let (library, _temp) = setup_library();
            let path = touch(&library, "a.mp3", b"x");
            library.delete(Path::new("a.mp3")).expect("delete");
            assert!(!path.exists());
        }

        #[test]
        fn test_trash_and_restore() {
            let (library, _temp) = setup_library();
            let path = touch(&library, "a.mp3", b"x");

            let name = library.move_to_trash(Path::new("a.mp3")).expect("trash");
            assert_eq!(name, "a.mp3");
            assert!(!path.exists());
            assert!(library.scan().unwrap().is_empty());

            let trash = library.list_trash().expect("list");
            assert_eq!(trash.len(), 1);
            assert_eq!(trash[0].name, "a.mp3");

            let restored = library.restore("a.mp3").expect("restore");
            assert_eq!(restored, path);
            assert!(library.list_trash().unwrap().is_empty());
        }

        #[test]
        fn test_trash_collision_gets_suffix() {
            let (library, _temp) = setup_library();
            touch(&library, "a.mp3", b"first");
            library.move_to_trash(Path::new("a.mp3")).expect("trash");
            touch(&library, "a.mp3", b"second");

            let name = library.move_to_trash(Path::new("a.mp3")).expect("trash");
            assert_ne!(name, "a.mp3");
            assert!(name.starts_with("a_"));
            assert!(
                Path::new(&name)
                    .extension()
                    .is_some_and(|e| e == "mp3")
            );
            assert_eq!(library.list_trash().unwrap().len(), 2);
        }

        #[test]
        fn test_restore_collision_keeps_both() {
            let (library, _temp) = setup_library();
            touch(&library, "a.mp3", b"old");
            library.move_to_trash(Path::new("a.mp3")).expect("trash");
            touch(&library, "a.mp3", b"new");

            let restored = library.restore("a.mp3").expect("restore");
            assert_ne!(restored, library.root().join("a.mp3"));
            assert_eq!(fs::read(&restored).unwrap(), b"old");
            assert_eq!(fs::read(library.root().join("a.mp3")).unwrap(), b"new");
        }

        #[test]
        fn test_delete_from_trash_and_empty() {
            let (library, _temp) = setup_library();
            touch(&library, "a.mp3", b"x");
            touch(&library, "b.mp3", b"x");
            touch(&library, "c.mp3", b"x");
            for name in ["a.mp3", "b.mp3", "c.mp3"] {
                library.move_to_trash(Path::new(name)).expect("trash");
            }

            library.delete_from_trash("a.mp3").expect("purge");
            assert_eq!(library.list_trash().unwrap().len(), 2);

            assert_eq!(library.empty_trash().expect("empty"), 2);
            assert!(library.list_trash().unwrap().is_empty());
        }

        #[test]
        fn test_trash_name_validation() {
            let (library, _temp) = setup_library();
            assert!(matches!(
                library.restore("../a.mp3").unwrap_err(),
                Error::Library(LibraryError::OutsideLibrary { .. })
            ));
            assert!(matches!(
                library.delete_from_trash("missing.mp3").unwrap_err(),
                Error::Library(LibraryError::NotInTrash { .. })
            ));
        }

        #[test]
        fn test_list_trash_when_missing() {
            let (library, _temp) = setup_library();
            assert!(library.list_trash().unwrap().is_empty());
            assert_eq!(library.empty_trash().unwrap(), 0);
        }
    }
}
