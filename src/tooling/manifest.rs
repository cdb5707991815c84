// Rewriting Cloudflare Stream asset links into HLS manifest links.
use super::*;
use std::fmt;

pub const MANIFEST_FRAGMENT: &str = "manifest/video.m3u8";
pub const THUMBNAIL_FRAGMENT: &str = "thumbnails/thumbnail.jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrl {
    text: String,
    parsed: Option<Url>,
}

impl StreamUrl {
    fn new(text: String) -> Self {
        // Scheme-less links are still handed to FFmpeg as typed.
        let parsed = match Url::parse(&text) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                log::debug!("{text:?} is not an absolute URL: {error}");
                None
            }
        };
        Self { text, parsed }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_absolute(&self) -> bool {
        self.parsed.is_some()
    }

    pub fn scheme(&self) -> Option<&str> {
        self.parsed.as_ref().map(Url::scheme)
    }

    pub fn host(&self) -> Option<&str> {
        self.parsed.as_ref().and_then(Url::host_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.parsed.as_ref().map(Url::path)
    }

    pub fn query(&self) -> Option<&str> {
        self.parsed.as_ref().and_then(Url::query)
    }
}

impl fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// Substring match, then a textual cut at the first `#` so query bytes stay as typed.
pub fn to_manifest_url(input: &str) -> Result<StreamUrl, ToolingError> {
    let trimmed = input.trim();
    let rewritten = if trimmed.contains(MANIFEST_FRAGMENT) {
        trimmed.to_string()
    } else if trimmed.contains(THUMBNAIL_FRAGMENT) {
        trimmed.replace(THUMBNAIL_FRAGMENT, MANIFEST_FRAGMENT)
    } else {
        return Err(ToolingError::InvalidUrl {
            url: trimmed.to_string(),
        });
    };

    Ok(StreamUrl::new(strip_fragment(&rewritten).to_string()))
}

fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(index) => &url[..index],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_link_becomes_manifest_link() {
        let url = to_manifest_url("https://cf.example/abc/thumbnails/thumbnail.jpg?time=5s")
            .expect("manifest url");
        assert_eq!(url.as_str(), "https://cf.example/abc/manifest/video.m3u8?time=5s");
        assert!(url.is_absolute());
        assert_eq!(url.scheme(), Some("https"));
        assert_eq!(url.host(), Some("cf.example"));
        assert_eq!(url.path(), Some("/abc/manifest/video.m3u8"));
        assert_eq!(url.query(), Some("time=5s"));
    }

    #[test]
    fn manifest_link_only_loses_its_fragment() {
        let url = to_manifest_url("https://cf.example/abc/manifest/video.m3u8#frag")
            .expect("manifest url");
        assert_eq!(url.as_str(), "https://cf.example/abc/manifest/video.m3u8");
    }

    #[test]
    fn query_bytes_are_preserved_verbatim() {
        let input = "https://cf.example/abc/manifest/video.m3u8?b=2&a=%2F x&clientBandwidthHint=1.5#t=3";
        let url = to_manifest_url(input).expect("manifest url");
        assert_eq!(
            url.as_str(),
            "https://cf.example/abc/manifest/video.m3u8?b=2&a=%2F x&clientBandwidthHint=1.5"
        );
    }

    #[test]
    fn thumbnail_rewrite_keeps_authority_and_position() {
        let input = "https://customer-x1.cloudflarestream.com/6b9e68b0/thumbnails/thumbnail.jpg?height=270#top";
        let url = to_manifest_url(input).expect("manifest url");
        assert_eq!(
            url.as_str(),
            "https://customer-x1.cloudflarestream.com/6b9e68b0/manifest/video.m3u8?height=270"
        );
    }

    #[test]
    fn unrelated_links_are_rejected() {
        let error = to_manifest_url("https://cf.example/abc/other.jpg").expect_err("invalid");
        match error {
            ToolingError::InvalidUrl { url } => assert_eq!(url, "https://cf.example/abc/other.jpg"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(to_manifest_url("").is_err());
    }

    #[test]
    fn scheme_less_links_are_rewritten_as_typed() {
        let url = to_manifest_url("cf.example/abc/thumbnails/thumbnail.jpg?time=5s#x")
            .expect("manifest url");
        assert_eq!(url.as_str(), "cf.example/abc/manifest/video.m3u8?time=5s");
        assert!(!url.is_absolute());
        assert_eq!(url.scheme(), None);
        assert_eq!(url.host(), None);
        assert_eq!(url.path(), None);

        let plain = to_manifest_url("cf.example/abc/thumbnails/thumbnail.jpg?time=5s")
            .expect("manifest url");
        assert_eq!(plain.as_str(), "cf.example/abc/manifest/video.m3u8?time=5s");
    }

    #[test]
    fn rewriting_is_idempotent() {
        let first = to_manifest_url("https://cf.example/abc/thumbnails/thumbnail.jpg?time=5s#x")
            .expect("manifest url");
        let second = to_manifest_url(first.as_str()).expect("manifest url");
        assert_eq!(first, second);
    }

    #[test]
    fn fragment_text_in_query_still_matches() {
        let url = to_manifest_url("https://cf.example/watch?next=thumbnails/thumbnail.jpg")
            .expect("substring match");
        assert_eq!(url.as_str(), "https://cf.example/watch?next=manifest/video.m3u8");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let url = to_manifest_url("  https://cf.example/abc/manifest/video.m3u8\n")
            .expect("manifest url");
        assert_eq!(url.as_str(), "https://cf.example/abc/manifest/video.m3u8");
    }
}
