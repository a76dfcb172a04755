//! Scanning rendered HTML for downloadable file URLs.
//!
//! Course content arrives as HTML with the real files buried in anchors
//! and media tags. This pulls out every URL the pool can manage, in
//! document order and without duplicates, so a module's text can be
//! prefetched alongside its file list.

use std::sync::LazyLock;

use regex::Regex;

use filepool_core::RemoteFile;

use crate::identity::{decode_html_entities, is_downloadable_url};

/// Opening tags that can reference a file.
static MEDIA_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(a|img|audio|video|source|track)\b[^>]*>").expect("valid tag pattern")
});

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\shref\s*=\s*["']([^"']+)["']"#).expect("valid href pattern"));

static SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\ssrc\s*=\s*["']([^"']+)["']"#).expect("valid src pattern"));

static POSTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\sposter\s*=\s*["']([^"']+)["']"#).expect("valid poster pattern")
});

/// Collect the downloadable URLs referenced by a piece of HTML.
///
/// Anchors contribute their `href`, media tags their `src`, videos also
/// their `poster`. URLs that the pool cannot manage (anything that is not
/// a pluginfile, theme image or gravatar URL) are skipped.
pub fn extract_downloadable_urls_from_html(html: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for caps in MEDIA_TAG.captures_iter(html) {
        let tag = caps.get(0).map_or("", |m| m.as_str());
        let name = caps[1].to_ascii_lowercase();

        let attribute = if name == "a" { &*HREF } else { &*SRC };
        push_downloadable(&mut urls, attribute, tag);

        if name == "video" {
            push_downloadable(&mut urls, &POSTER, tag);
        }
    }

    urls
}

/// Like [`extract_downloadable_urls_from_html`], wrapping each URL in a
/// bare [`RemoteFile`] ready for the prefetch entry points.
pub fn extract_downloadable_files_from_html(html: &str) -> Vec<RemoteFile> {
    extract_downloadable_urls_from_html(html)
        .into_iter()
        .map(RemoteFile::new)
        .collect()
}

fn push_downloadable(urls: &mut Vec<String>, attribute: &Regex, tag: &str) {
    let Some(caps) = attribute.captures(tag) else {
        return;
    };

    // Markup carries entity-encoded URLs; the pool wants them raw.
    let url = decode_html_entities(&caps[1]);
    if is_downloadable_url(&url) && !urls.contains(&url) {
        urls.push(url);
    }
}
