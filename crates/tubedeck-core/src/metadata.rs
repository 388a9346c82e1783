//! Audio metadata extraction.
//!
//! Tags come from ID3 (`id3`), duration from probing the container with
//! `symphonia`. Files without tags or with an unreadable stream still yield
//! metadata; only a missing file is an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use tubedeck_core::metadata::extract_metadata;
//! use std::path::Path;
//!
//! let metadata = extract_metadata(Path::new("song.mp3"))?;
//! println!("{} - {}", metadata.display_artist(), metadata.display_title());
//! ```

use std::fs::File;
use std::path::Path;

use id3::{Tag, TagLike};
use serde::{Deserialize, Serialize};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{Error, FileSystemError, Result};

/// Tags and duration of one audio file. Any field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Seconds, from the stream when it can be probed, else from `TLEN`.
    pub duration_secs: Option<f64>,
    pub track_number: Option<u32>,
    pub year: Option<i32>,
    pub genre: Option<String>,
}

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

impl TrackMetadata {
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    #[must_use]
    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST)
    }

    #[must_use]
    pub fn display_album(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }

    /// Duration as `M:SS`.
    #[must_use]
    pub fn formatted_duration(&self) -> Option<String> {
        let secs = self.duration_secs?.max(0.0) as u64;
        Some(format!("{}:{:02}", secs / 60, secs % 60))
    }
}

/// Read tags and duration. Untagged or undecodable files give empty
/// metadata.
///
/// # Errors
///
/// Only a missing file is an error.
pub fn extract_metadata(path: &Path) -> Result<TrackMetadata> {
    if !path.exists() {
        return Err(Error::FileSystem(FileSystemError::NotFound {
            path: path.to_path_buf(),
        }));
    }

    let mut metadata = read_id3(path);
    let probed = probe_duration(path);
    if probed.is_some() {
        metadata.duration_secs = probed;
    }

    debug!(
        "{}: title {:?}, artist {:?}, {:?}s",
        path.display(),
        metadata.title,
        metadata.artist,
        metadata.duration_secs
    );

    Ok(metadata)
}

/// Read ID3 tags, treating a missing or broken tag as empty.
fn read_id3(path: &Path) -> TrackMetadata {
    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => {
            return TrackMetadata::default();
        }
        Err(e) => {
            warn!("Unreadable ID3 tag in {}: {}", path.display(), e);
            return TrackMetadata::default();
        }
    };

    let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    TrackMetadata {
        title: non_empty(tag.title()),
        artist: non_empty(tag.artist()),
        album: non_empty(tag.album()),
        // TLEN is in milliseconds; used only when the stream can't be probed.
        duration_secs: tag.duration().map(|ms| f64::from(ms) / 1000.0),
        track_number: tag.track(),
        year: tag.year(),
        genre: tag.genre_parsed().map(|g| g.to_string()),
    }
}

/// Probe the stream duration in seconds.
///
/// Uses the frame count when the container declares it, otherwise sums
/// packet durations (MP3 without a Xing header, for instance).
pub fn probe_duration(path: &Path) -> Option<f64> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            debug!("Could not probe {}: {}", path.display(), e);
            return None;
        }
    };
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate)
        && rate > 0
    {
        return Some(frames as f64 / f64::from(rate));
    }

    let time_base = params.time_base?;
    let mut total_ts = 0u64;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            total_ts += packet.dur;
        }
    }
    let time = time_base.calc_time(total_ts);
    let secs = time.seconds as f64 + time.frac;
    (secs > 0.0).then_some(secs)
}
