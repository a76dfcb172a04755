//! File identity: mapping URLs onto stable pool ids.
//!
//! Two requests for the same file rarely carry the same URL: access tokens
//! rotate, revision path segments bump on every content update, encodings
//! differ between an HTML attribute and a web service response. Everything
//! cosmetic is scrubbed here so all spellings land on one id, otherwise
//! the pool fills with duplicates. The id keeps a human-readable guessed
//! filename in front of a short hash of the normalized URL.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use filepool_core::{FileId, PluginFileArgs, RemoteFile, StrategyRegistry, short_hash};

/// Token-authenticated variant of the pluginfile endpoint. Rewritten to
/// the plain form so files downloaded before a token upgrade keep their
/// identity.
static TOKEN_PLUGINFILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/tokenpluginfile\.php/[^/]+/").expect("valid token pattern"));

/// Query attributes that do not change which file is served.
static URL_ATTRIBUTES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(\?|&)token=[A-Za-z0-9]*",
        r"(\?|&)forcedownload=[0-1]",
        r"(\?|&)preview=[A-Za-z0-9]+",
        r"(\?|&)offline=[0-1]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid attribute pattern"))
    .collect()
});

/// Hash suffix a previously generated id carries in its filename.
static EMBEDDED_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_[a-f0-9]{16}").expect("valid hash pattern"));

static VALID_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+$").expect("valid extension pattern"));

/// Component segment of a theme image URL.
static THEME_IMAGE_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/core/([^/]*)/").expect("valid theme pattern"));

/// Characters that cannot appear in a pool file name.
static SPECIAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[#:/?\\]+").expect("valid sanitize pattern"));

static HTML_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX]?[0-9a-fA-F]+|[A-Za-z]+);").expect("valid entity pattern"));

static URL_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]+([^=&]+)=?([^&]*)").expect("valid param pattern"));

/// Derive the pool id for a URL.
///
/// The URL is canonicalized first: the token endpoint is rewritten to its
/// plain form, the revision is scrubbed through the component's strategy,
/// percent- and entity-encoding are undone and ignorable query attributes
/// dropped. The id is then a guessed filename plus a hash of that
/// normalized URL.
pub fn file_id_for_url(strategies: &StrategyRegistry, file_url: &str) -> FileId {
    let mut url = TOKEN_PLUGINFILE
        .replace(file_url, "/webservice/pluginfile.php/")
        .into_owned();

    url = remove_revision_from_url(strategies, &url);
    url = decode_html_entities(&percent_decode(&url));

    if url.contains("/webservice/pluginfile") {
        url = strip_url_attributes(&url);
    }

    let filename = guess_filename(&url);

    FileId::new(add_hash_to_filename(&url, &filename))
}

/// Strip the revision from a URL through the component's strategy.
/// Non-pluginfile URLs carry no revision and pass through unchanged.
pub fn remove_revision_from_url(strategies: &StrategyRegistry, url: &str) -> String {
    match PluginFileArgs::from_url(url) {
        Some(args) => strategies.strategy_for(Some(&args)).remove_revision(url, &args),
        None => url.to_string(),
    }
}

/// Extract the revision from a URL through the component's strategy.
pub fn revision_from_url(strategies: &StrategyRegistry, url: &str) -> i64 {
    match PluginFileArgs::from_url(url) {
        Some(args) => strategies
            .strategy_for(Some(&args))
            .revision_from_url(url, &args),
        None => 0,
    }
}

/// Highest revision across a file list. A package's revision.
pub fn revision_from_file_list(strategies: &StrategyRegistry, files: &[RemoteFile]) -> i64 {
    files
        .iter()
        .map(|file| revision_from_url(strategies, &file.url))
        .max()
        .unwrap_or(0)
}

/// Latest modification time across a file list.
pub fn timemodified_from_file_list(files: &[RemoteFile]) -> i64 {
    files.iter().map(|file| file.timemodified).max().unwrap_or(0)
}

/// Directory name a multi-file package unpacks into. A hash of the
/// normalized URL, keeping a meaningful extension when the URL has one.
pub fn package_dir_name_for_url(strategies: &StrategyRegistry, file_url: &str) -> String {
    let mut url = remove_revision_from_url(strategies, file_url);
    let mut extension = String::new();

    if url.contains("/webservice/pluginfile") {
        url = strip_url_attributes(&url);

        if let Some(candidate) = guess_extension_from_url(&url) {
            // A "php" extension means a script endpoint, not a package.
            if candidate != "php" {
                extension = format!(".{candidate}");
            }
        }
    }

    format!("{}{extension}", short_hash(&format!("url:{url}")))
}

/// Guess the extension of the file a URL points at. Weak by nature: the
/// candidate must look like an extension and map to a known mimetype.
pub fn guess_extension_from_url(url: &str) -> Option<String> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let (_, candidate) = url[..end].rsplit_once('.')?;
    let candidate = candidate.to_lowercase();

    if VALID_EXTENSION.is_match(&candidate) && mime_guess::from_ext(&candidate).first().is_some() {
        Some(candidate)
    } else {
        None
    }
}

/// Whether a URL points at content this pool can manage.
pub fn is_downloadable_url(url: &str) -> bool {
    is_plugin_file_url(url)
        || is_token_plugin_file_url(url)
        || is_theme_image_url(url)
        || is_gravatar_url(url)
}

pub(crate) fn is_plugin_file_url(url: &str) -> bool {
    url.contains("/pluginfile.php")
}

pub(crate) fn is_token_plugin_file_url(url: &str) -> bool {
    url.contains("/tokenpluginfile.php")
}

pub(crate) fn is_theme_image_url(url: &str) -> bool {
    url.contains("/theme/image.php")
}

pub(crate) fn is_gravatar_url(url: &str) -> bool {
    url.contains("gravatar.com/avatar")
}

/// Guess a readable filename for a URL, so pooled files can be told apart
/// by eye. The guess feeds the id, it never has to be unique on its own.
pub(crate) fn guess_filename(url: &str) -> String {
    let mut filename = if url.contains("/webservice/pluginfile") {
        // Web service URLs name the real file in the "file" param.
        match query_param(url, "file") {
            Some(file) => file[file.rfind('/').map_or(0, |i| i + 1)..].to_string(),
            None => last_segment_without_params(url),
        }
    } else if is_gravatar_url(url) {
        format!("gravatar_{}", last_segment_without_params(url))
    } else if is_theme_image_url(url) {
        let component = THEME_IMAGE_COMPONENT
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str());
        format!("default_{component}_{}", last_segment_without_params(url))
    } else {
        last_segment_without_params(url)
    };

    // Fragments become part of the name; the same page anchored twice is
    // two different files for an IMS package.
    let mut fragments = None;
    if let Some(index) = filename.find('#') {
        fragments = Some(filename[index + 1..].replace('#', "_"));
        filename.truncate(index);
    }

    filename = remove_known_extension(&filename);

    if let Some(fragments) = fragments {
        filename.push('_');
        filename.push_str(&fragments);
    }

    sanitize_filename(&filename)
}

/// Append a short hash of the URL to the filename, unless the filename
/// already ends in the hash of this very URL (a file downloaded and
/// re-uploaded keeps its id).
pub(crate) fn add_hash_to_filename(url: &str, filename: &str) -> String {
    if let Some(found) = EMBEDDED_HASH.find_iter(filename).last() {
        let hash = found.as_str();
        let treated_url = url.replacen(hash, "", 1);

        if format!("_{}", short_hash(&format!("url:{treated_url}"))) == hash {
            return filename.to_string();
        }
    }

    format!("{filename}_{}", short_hash(&format!("url:{url}")))
}

/// Decode the HTML entities that show up in URLs lifted from markup.
pub(crate) fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    HTML_ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                "nbsp" => " ".to_string(),
                _ => entity.strip_prefix('#').map_or_else(
                    || caps[0].to_string(),
                    |digits| {
                        let code = digits.strip_prefix(['x', 'X']).map_or_else(
                            || digits.parse::<u32>().ok(),
                            |hex| u32::from_str_radix(hex, 16).ok(),
                        );
                        code.and_then(char::from_u32)
                            .map_or_else(|| caps[0].to_string(), |c| c.to_string())
                    },
                ),
            }
        })
        .into_owned()
}

fn percent_decode(url: &str) -> String {
    urlencoding::decode(url).map_or_else(|_| url.to_string(), Cow::into_owned)
}

fn strip_url_attributes(url: &str) -> String {
    let mut url = url.to_string();
    for pattern in URL_ATTRIBUTES.iter() {
        url = pattern.replace_all(&url, "").into_owned();
    }
    url
}

/// Value of a query parameter, scanning the whole URL the way a lax
/// parser would. Later occurrences win; an empty value counts as absent.
fn query_param(url: &str, name: &str) -> Option<String> {
    let mut value = None;
    for caps in URL_PARAM.captures_iter(url) {
        if &caps[1] == name {
            value = Some(caps[2].to_string());
        }
    }
    value.filter(|v| !v.is_empty())
}

fn last_segment_without_params(url: &str) -> String {
    let segment = &url[url.rfind('/').map_or(0, |i| i + 1)..];
    segment
        .find('?')
        .map_or_else(|| segment.to_string(), |i| segment[..i].to_string())
}

/// Strip a trailing extension, but only one that maps to a real mimetype.
/// "Unit 1.2" keeps its dot.
fn remove_known_extension(filename: &str) -> String {
    if let Some(position) = filename.rfind('.') {
        let candidate = filename[position + 1..].to_lowercase();
        if mime_guess::from_ext(&candidate).first().is_some() {
            return filename[..position].to_string();
        }
    }
    filename.to_string()
}

fn sanitize_filename(text: &str) -> String {
    SPECIAL_CHARS.replace_all(text, "_").into_owned()
}
