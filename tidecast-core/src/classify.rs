//! Input classification.
//!
//! Decides, before the streaming core is involved, whether an argument is a
//! local file to relay or something the controller can play directly.

use std::path::PathBuf;

use url::Url;

use crate::CastError;
use crate::controller::rpc::{sendtokodi_plugin_uri, youtube_plugin_uri};

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];

/// What an input argument refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayTarget {
    /// Local file relayed through the origin server
    LocalFile(PathBuf),
    /// YouTube video played by the controller's add-on
    YouTube(String),
    /// URL handed to the controller unchanged
    Remote(String),
    /// Page URL resolved by the SendToKodi add-on
    SendToKodi(String),
}

impl PlayTarget {
    /// URI for `Player.Open` when the controller plays the target directly.
    pub fn direct_uri(&self) -> Option<String> {
        match self {
            PlayTarget::LocalFile(_) => None,
            PlayTarget::YouTube(video_id) => Some(youtube_plugin_uri(video_id)),
            PlayTarget::Remote(uri) => Some(uri.clone()),
            PlayTarget::SendToKodi(url) => Some(sendtokodi_plugin_uri(url)),
        }
    }
}

/// Classifies a command-line input.
pub fn classify(input: &str) -> PlayTarget {
    let Some(url) = parse_url(input) else {
        return PlayTarget::LocalFile(PathBuf::from(input));
    };

    if url.scheme() == "file" {
        return match url.to_file_path() {
            Ok(path) => PlayTarget::LocalFile(path),
            Err(()) => PlayTarget::LocalFile(PathBuf::from(url.path())),
        };
    }

    match youtube_video_id(&url) {
        Some(video_id) => PlayTarget::YouTube(video_id),
        None => PlayTarget::Remote(input.to_string()),
    }
}

/// Validates a URL for the SendToKodi add-on.
///
/// # Errors
///
/// - `CastError::Configuration` - Input is not an http(s) URL with a host
pub fn sendtokodi_target(input: &str) -> Result<PlayTarget, CastError> {
    match parse_url(input) {
        Some(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Ok(PlayTarget::SendToKodi(url.to_string()))
        }
        _ => Err(CastError::Configuration {
            reason: format!("{input} is not a valid http(s) URL"),
        }),
    }
}

/// Extracts the video id of a YouTube watch, short, embed or youtu.be URL.
pub fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;

    let candidate = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if YOUTUBE_HOSTS.contains(&host) {
        let mut segments = url.path_segments()?;
        match segments.next()? {
            "watch" => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            "shorts" | "embed" | "live" => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| is_video_id(id))
}

fn is_video_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_url(input: &str) -> Option<Url> {
    let url = Url::parse(input).ok()?;
    // Single-letter schemes are Windows drive letters.
    (url.scheme().len() > 1).then_some(url)
}
