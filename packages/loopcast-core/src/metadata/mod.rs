//! Now-playing metadata.
//!
//! A [`TrackInfoHub`] owns the current [`TrackInfo`] and hands out
//! [`TrackSubscription`]s. While at least one subscription is alive the hub
//! polls its [`TitleSource`]; with none it stays idle.

mod hub;
mod source;

pub use hub::{TrackInfoHub, TrackSubscription};
pub use source::{CommandTitleSource, TitleSource};

use serde::Serialize;

/// Separators tried, in order, when splitting "Artist – Track".
const TITLE_SEPARATORS: [&str; 2] = [" \u{2013} ", " - "];

/// Title reported when the source has nothing to say.
pub const UNAVAILABLE_TITLE: &str = "N/A";

/// Immutable snapshot of what's playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub full_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

impl TrackInfo {
    /// Builds track info from a player-style title, splitting
    /// `"Artist – Track"` into its parts when a separator is present.
    ///
    /// A separator at the very start doesn't count: there'd be no artist.
    pub fn from_title(title: &str) -> Self {
        let split = TITLE_SEPARATORS.iter().find_map(|sep| {
            title
                .find(sep)
                .filter(|&idx| idx > 0)
                .map(|idx| (&title[..idx], &title[idx + sep.len()..]))
        });

        Self {
            full_title: title.to_string(),
            artist: split.map(|(artist, _)| artist.to_string()),
            track: split.map(|(_, track)| track.to_string()),
        }
    }

    /// The placeholder used before any title is known.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::from_title(UNAVAILABLE_TITLE)
    }
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_en_dash() {
        let info = TrackInfo::from_title("Daft Punk \u{2013} Around the World");
        assert_eq!(info.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(info.track.as_deref(), Some("Around the World"));
        assert_eq!(info.full_title, "Daft Punk \u{2013} Around the World");
    }

    #[test]
    fn splits_on_ascii_hyphen() {
        let info = TrackInfo::from_title("Air - La femme d'argent");
        assert_eq!(info.artist.as_deref(), Some("Air"));
        assert_eq!(info.track.as_deref(), Some("La femme d'argent"));
    }

    #[test]
    fn only_first_separator_splits() {
        let info = TrackInfo::from_title("A \u{2013} B \u{2013} C");
        assert_eq!(info.artist.as_deref(), Some("A"));
        assert_eq!(info.track.as_deref(), Some("B \u{2013} C"));
    }

    #[test]
    fn no_separator_keeps_only_full_title() {
        let info = TrackInfo::from_title("Radio Stream");
        assert_eq!(info.full_title, "Radio Stream");
        assert!(info.artist.is_none());
        assert!(info.track.is_none());
    }

    #[test]
    fn leading_separator_is_not_a_split() {
        let info = TrackInfo::from_title(" - intro");
        assert!(info.artist.is_none());
    }

    #[test]
    fn default_is_unavailable() {
        assert_eq!(TrackInfo::default().full_title, "N/A");
    }
}
