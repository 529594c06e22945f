//! Structural SDP checks
//!
//! This is not a full SDP parser. The transport library does the real parsing;
//! here we only reject text that is obviously not a session description and
//! find out which media sections it carries.

use crate::{
    config::VideoCodecConfig,
    error::{WebRtcError, WebRtcResult},
};
use std::fmt;

/// Media type of an `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// `m=audio`
    Audio,
    /// `m=video`
    Video,
    /// `m=application` (data channels)
    Application,
    /// Anything else
    Other(String),
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
            Self::Application => f.write_str("application"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MediaKind {
    fn from(s: &str) -> Self {
        match s {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "application" => Self::Application,
            other => Self::Other(other.to_string()),
        }
    }
}

impl MediaKind {
    /// Audio or video
    pub fn is_av(&self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }
}

/// What a structurally valid description contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpSummary {
    /// Media sections in order of appearance
    pub media: Vec<MediaKind>,
}

impl SdpSummary {
    /// Whether any audio or video section is present
    pub fn has_av(&self) -> bool {
        self.media.iter().any(MediaKind::is_av)
    }
}

/// Validate that `sdp` is a structurally well-formed session description
///
/// Requires `v=0` first, an `o=` and an `s=` line, every non-empty line in
/// `<letter>=<value>` form, and every `m=` line to carry at least media, port,
/// proto and one format. An offer without media sections is accepted.
///
/// # Errors
/// Returns `WebRtcError::InvalidOffer` describing the first problem found.
pub fn validate_offer(sdp: &str) -> WebRtcResult<SdpSummary> {
    let mut lines = sdp_lines(sdp).peekable();

    match lines.peek() {
        Some(&"v=0") => {}
        Some(first) => {
            return Err(invalid(format!("first line must be 'v=0', got '{}'", truncate(first))))
        }
        None => return Err(invalid("empty session description")),
    }

    let mut summary = SdpSummary::default();
    let mut has_origin = false;
    let mut has_session_name = false;

    for (index, line) in lines.enumerate() {
        let Some((key, value)) = split_line(line) else {
            return Err(invalid(format!(
                "line {} is not '<type>=<value>': '{}'",
                index + 1,
                truncate(line)
            )));
        };

        match key {
            'o' => has_origin = true,
            's' => has_session_name = true,
            'm' => summary.media.push(parse_media_line(value, index + 1)?),
            _ => {}
        }
    }

    if !has_origin {
        return Err(invalid("missing 'o=' line"));
    }
    if !has_session_name {
        return Err(invalid("missing 's=' line"));
    }

    Ok(summary)
}

/// Media kinds of the `m=` lines in `sdp`, without validation
pub fn media_kinds(sdp: &str) -> Vec<MediaKind> {
    sdp_lines(sdp)
        .filter_map(|line| line.strip_prefix("m="))
        .filter_map(|value| value.split_whitespace().next())
        .map(MediaKind::from)
        .collect()
}

/// Make sure an answer carries a negotiable video section
///
/// Returns the (possibly extended) answer and whether a section was added.
/// The appended section reuses the session's ICE credentials and DTLS
/// fingerprint so the transport can still bind it.
pub fn ensure_media_section(answer: &str, codec: &VideoCodecConfig) -> (String, bool) {
    let kinds = media_kinds(answer);
    if kinds.iter().any(MediaKind::is_av) {
        return (answer.to_string(), false);
    }

    let mut out = String::with_capacity(answer.len() + 256);
    for line in sdp_lines(answer) {
        out.push_str(line);
        out.push_str("\r\n");
    }

    let pt = codec.payload_type;
    out.push_str(&format!("m=video 9 UDP/TLS/RTP/SAVPF {}\r\n", pt));
    out.push_str("c=IN IP4 0.0.0.0\r\n");
    out.push_str(&format!(
        "a=rtpmap:{} {}/{}\r\n",
        pt,
        codec.encoding_name(),
        codec.clock_rate
    ));
    for attr in transport_attributes(answer) {
        out.push_str(attr);
        out.push_str("\r\n");
    }
    out.push_str(&format!("a=mid:{}\r\n", kinds.len()));
    out.push_str("a=sendonly\r\n");
    out.push_str("a=rtcp-mux\r\n");

    (out, true)
}

/// First occurrence of each ICE/DTLS attribute, session- or media-level
fn transport_attributes(sdp: &str) -> Vec<&str> {
    const PREFIXES: &[&str] = &["a=ice-ufrag:", "a=ice-pwd:", "a=fingerprint:", "a=setup:"];

    PREFIXES
        .iter()
        .filter_map(|prefix| sdp_lines(sdp).find(|line| line.starts_with(prefix)))
        .collect()
}

fn parse_media_line(value: &str, line_no: usize) -> WebRtcResult<MediaKind> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(invalid(format!(
            "m= line {} needs media, port, proto and at least one format",
            line_no
        )));
    }

    // Port may be written as `<port>/<count>`
    let port = tokens[1].split('/').next().unwrap_or_default();
    if port.parse::<u16>().is_err() {
        return Err(invalid(format!(
            "m= line {} has a non-numeric port '{}'",
            line_no, tokens[1]
        )));
    }

    Ok(MediaKind::from(tokens[0]))
}

fn split_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let key = chars.next()?;
    if !key.is_ascii_lowercase() || chars.next()? != '=' {
        return None;
    }
    Some((key, &line[2..]))
}

fn sdp_lines(sdp: &str) -> impl Iterator<Item = &str> {
    sdp.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(40) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn invalid(msg: impl Into<String>) -> WebRtcError {
    WebRtcError::InvalidOffer(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=recvonly\r\n\
        a=rtpmap:96 VP8/90000\r\n";

    const DATA_ONLY_ANSWER: &str = "v=0\r\n\
        o=- 1 1 IN IP4 0.0.0.0\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=fingerprint:sha-256 AA:BB\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        a=ice-ufrag:abcd\r\n\
        a=ice-pwd:secretsecretsecret\r\n\
        a=setup:active\r\n\
        a=mid:0\r\n";

    #[test]
    fn test_validate_video_offer() {
        let summary = validate_offer(VIDEO_OFFER).unwrap();
        assert_eq!(summary.media, vec![MediaKind::Video]);
        assert!(summary.has_av());
    }

    #[test]
    fn test_offer_without_media_is_structurally_valid() {
        let summary = validate_offer("v=0\no=- 1 1 IN IP4 0.0.0.0\ns=-\nt=0 0\n").unwrap();
        assert!(summary.media.is_empty());
        assert!(!summary.has_av());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let cases = [
            "",
            "hello",
            "v=1\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\n",
            "v=0\r\ns=-\r\n",
            "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n",
            "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nnot a line\r\n",
            "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nm=video 9\r\n",
            "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nm=video nine RTP/AVP 96\r\n",
        ];
        for sdp in cases {
            let err = validate_offer(sdp).unwrap_err();
            assert!(matches!(err, WebRtcError::InvalidOffer(_)), "accepted {:?}", sdp);
        }
    }

    #[test]
    fn test_ensure_media_section_appends_video() {
        let (answer, added) = ensure_media_section(DATA_ONLY_ANSWER, &VideoCodecConfig::default());
        assert!(added);
        assert_eq!(
            media_kinds(&answer),
            vec![MediaKind::Application, MediaKind::Video]
        );
        assert!(answer.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n"));
        assert!(answer.contains("a=rtpmap:96 VP8/90000\r\n"));
        assert!(answer.ends_with("a=rtcp-mux\r\n"));

        let video_section = answer.split("m=video").nth(1).unwrap();
        assert!(video_section.contains("a=ice-ufrag:abcd"));
        assert!(video_section.contains("a=fingerprint:sha-256 AA:BB"));
        assert!(video_section.contains("a=mid:1"));
        assert!(validate_offer(&answer).is_ok());
    }

    #[test]
    fn test_ensure_media_section_keeps_av_answer() {
        let (answer, added) = ensure_media_section(VIDEO_OFFER, &VideoCodecConfig::default());
        assert!(!added);
        assert_eq!(answer, VIDEO_OFFER);
    }
}
