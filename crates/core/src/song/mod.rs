use std::sync::OnceLock;

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use serde::{Deserialize, Serialize};

use crate::{KboxError, Result};

/// Types generated from `proto/kbox.proto`.
mod proto {
    include!(concat!(env!("OUT_DIR"), "/kbox.rs"));
}

static DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/kbox_descriptor.bin"));

/// Largest song file accepted, in bytes.
pub const MAX_SONG_BYTES: usize = 4 * 1024 * 1024;

/// Deepest message nesting accepted in song text, matching protobuf's
/// default recursion limit.
pub const MAX_NESTING: usize = 100;

/// A parsed song as served to the lyrics display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artist: String,
    #[serde(default)]
    pub lines: Vec<LyricLine>,
}

/// One line of lyrics and when it is sung, relative to the song start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    pub text: String,
    pub start_ms: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Song {
    /// Parses the protobuf text encoding of a `SongFile`. A file without a
    /// `song` message yields the default song.
    pub fn from_text(input: &str) -> Result<Self> {
        check_shape(input)?;
        let message = DynamicMessage::parse_text_format(song_file_descriptor()?, input)?;
        let file: proto::SongFile = message.transcode_to()?;
        Ok(file.song.map(Song::from).unwrap_or_default())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Playback length derived from the last line to finish.
    pub fn duration_ms(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| line.start_ms.saturating_add(line.duration_ms))
            .max()
            .unwrap_or(0)
    }
}

impl From<proto::Song> for Song {
    fn from(song: proto::Song) -> Self {
        Self {
            name: song.name,
            artist: song.artist,
            lines: song.line.into_iter().map(LyricLine::from).collect(),
        }
    }
}

impl From<proto::Line> for LyricLine {
    fn from(line: proto::Line) -> Self {
        Self {
            text: line.text,
            start_ms: line.start_ms,
            duration_ms: line.duration_ms,
        }
    }
}

fn song_file_descriptor() -> Result<MessageDescriptor> {
    static POOL: OnceLock<std::result::Result<DescriptorPool, String>> = OnceLock::new();
    let pool = POOL
        .get_or_init(|| DescriptorPool::decode(DESCRIPTOR_SET).map_err(|err| err.to_string()))
        .as_ref()
        .map_err(|err| KboxError::msg(format!("song schema unavailable: {err}")))?;
    pool.get_message_by_name("kbox.SongFile")
        .ok_or_else(|| KboxError::msg("song schema has no kbox.SongFile message"))
}

/// Rejects input too large or too deeply nested to hand to the parser.
fn check_shape(input: &str) -> Result<()> {
    if input.len() > MAX_SONG_BYTES {
        return Err(KboxError::parse(
            1,
            1,
            format!("song text is {} bytes, limit is {MAX_SONG_BYTES}", input.len()),
        ));
    }

    let (mut line, mut column) = (1, 0);
    let mut depth = 0usize;
    let mut quote = None;
    let mut escaped = false;
    let mut comment = false;

    for c in input.chars() {
        if c == '\n' {
            line += 1;
            column = 0;
            comment = false;
            continue;
        }
        column += 1;

        if comment {
            continue;
        }
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '#' => comment = true,
            '{' | '<' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(KboxError::parse(
                        line,
                        column,
                        format!("messages nested deeper than {MAX_NESTING}"),
                    ));
                }
            }
            '}' | '>' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OH_DARLING: &str = r#"
        # Abbey Road, side one
        song {
          name: "Oh! Darling"
          artist: "The Beatles"
          line { text: "Oh! Darling, please believe me" start_ms: 0 duration_ms: 4000 }
          line { text: "I'll never do you no harm" start_ms: 4000 duration_ms: 3500 }
        }
    "#;

    #[test]
    fn parses_song_file() {
        let song = Song::from_text(OH_DARLING).unwrap();
        assert_eq!(song.name, "Oh! Darling");
        assert_eq!(song.artist, "The Beatles");
        assert_eq!(song.lines.len(), 2);
        assert_eq!(song.lines[1].start_ms, 4000);
        assert_eq!(song.duration_ms(), 7500);
    }

    #[test]
    fn empty_file_is_default_song() {
        assert_eq!(Song::from_text("# nothing here\n").unwrap(), Song::default());
    }

    #[test]
    fn decodes_octal_and_hex_escapes() {
        let song = Song::from_text(r#"song { name: "caf\303\251" artist: "\x41\tB" }"#).unwrap();
        assert_eq!(song.name, "café");
        assert_eq!(song.artist, "A\tB");
    }

    #[test]
    fn rejects_text_outside_the_schema() {
        assert!(Song::from_text("song { title: \"x\" }").is_err());
        assert!(Song::from_text("song { line { start_ms: -5 } }").is_err());
        assert!(Song::from_text("song { name: 12 }").is_err());
        assert!(Song::from_text("song { name: \"x\"").is_err());
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let err = Song::from_text(&"a{".repeat(1_000_000)).unwrap_err();
        match err {
            KboxError::Parse { line, column, .. } => {
                assert_eq!((line, column), (1, 2 * (MAX_NESTING + 1)))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn brackets_inside_strings_and_comments_do_not_count() {
        let mut text = String::from("song {\n");
        text.push_str(&format!("  name: \"{}\"\n", "{".repeat(500)));
        text.push_str(&format!("  # {}\n", "<".repeat(500)));
        text.push_str("}\n");
        assert_eq!(Song::from_text(&text).unwrap().name.len(), 500);
    }

    #[test]
    fn oversized_text_is_rejected() {
        let text = format!("# {}", "x".repeat(MAX_SONG_BYTES));
        assert!(matches!(Song::from_text(&text), Err(KboxError::Parse { .. })));
    }

    #[test]
    fn serialises_to_json() {
        let song = Song {
            name: "Hey Jude".to_string(),
            artist: String::new(),
            lines: vec![LyricLine {
                text: "Hey Jude".to_string(),
                start_ms: 10,
                duration_ms: 0,
            }],
        };
        let json = song.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"name":"Hey Jude","lines":[{"text":"Hey Jude","start_ms":10,"duration_ms":0}]}"#
        );
    }
}
