//! Content-plugin strategy port.
//!
//! Content types served through `pluginfile.php` can customize how their
//! files behave: URL fix-up, downloadability, revision extraction and
//! post-download processing. Each content type registers one strategy in
//! the [`StrategyRegistry`]; the engine resolves the strategy once per
//! operation from the URL shape and passes it down explicitly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::errors::FilepoolResult;
use crate::types::RemoteFile;

/// Revision pattern for the common `content` file area, where URLs look
/// like `.../pluginfile.php/21/mod_page/content/5/notes.txt`.
static CONTENT_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/content/(\d+)/").expect("valid revision pattern"));

/// Path arguments of a pluginfile URL.
///
/// A pluginfile path has at least a context id, a component and a file
/// area: `/pluginfile.php/<contextid>/<component>/<filearea>/...`. The
/// component segment is the discriminator used to pick a strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginFileArgs {
    segments: Vec<String>,
}

impl PluginFileArgs {
    /// Parse the path arguments out of a URL. Returns `None` for URLs
    /// that are not pluginfile URLs or carry fewer than three segments.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let index = url.find("/pluginfile.php")?;
        let relative = url.get(index + 16..)?;

        let segments: Vec<String> = relative.split('/').map(str::to_string).collect();
        if segments.len() < 3 {
            // To be a pluginfile it should have at least contextId, component and fileArea.
            return None;
        }

        Some(Self { segments })
    }

    /// The context id segment.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.segments[0]
    }

    /// The component segment, used as the strategy discriminator.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.segments[1]
    }

    /// The file area segment.
    #[must_use]
    pub fn file_area(&self) -> &str {
        &self.segments[2]
    }

    /// All path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

/// Verdict of a strategy on whether a file can be downloaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadableCheck {
    /// Whether the file can be downloaded.
    pub downloadable: bool,
    /// Why not, when it can't.
    pub reason: Option<String>,
}

impl DownloadableCheck {
    /// A positive verdict.
    #[must_use]
    pub const fn yes() -> Self {
        Self {
            downloadable: true,
            reason: None,
        }
    }

    /// A negative verdict with a reason.
    pub fn no(reason: impl Into<String>) -> Self {
        Self {
            downloadable: false,
            reason: Some(reason.into()),
        }
    }
}

/// Strategy customizing file handling for one content type.
///
/// Every method has a neutral default, so strategies only override what
/// they care about. Implementations must be cheap: the sync methods run
/// on every URL resolution.
#[async_trait]
pub trait PluginFileStrategy: Send + Sync {
    /// Adjust a file descriptor before identity resolution and download.
    fn fix_url(&self, file: RemoteFile) -> RemoteFile {
        file
    }

    /// Whether the file can be downloaded at all.
    fn is_downloadable(&self, _file: &RemoteFile) -> DownloadableCheck {
        DownloadableCheck::yes()
    }

    /// Extract the revision number from a URL. Zero when the URL carries
    /// none.
    fn revision_from_url(&self, _url: &str, _args: &PluginFileArgs) -> i64 {
        0
    }

    /// Strip the revision from a URL so one file is not stored once per
    /// revision.
    fn remove_revision(&self, url: &str, _args: &PluginFileArgs) -> String {
        url.to_string()
    }

    /// Size of the file, when the strategy knows better than the caller.
    fn size(&self, file: &RemoteFile) -> Option<u64> {
        file.size
    }

    /// Hook invoked after the file's bytes were written and recorded.
    async fn on_file_downloaded(&self, _url: &str, _path: &Path) -> FilepoolResult<()> {
        Ok(())
    }

    /// Hook invoked after the file was removed from the pool.
    async fn on_file_deleted(&self, _url: &str, _path: &Path) -> FilepoolResult<()> {
        Ok(())
    }
}

/// Fallback strategy for components without a registered one.
///
/// Handles the common `content` file area, where the segment after the
/// file area is the revision.
#[derive(Debug, Clone, Default)]
pub struct DefaultPluginFileStrategy;

impl DefaultPluginFileStrategy {
    /// Create the default strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PluginFileStrategy for DefaultPluginFileStrategy {
    fn revision_from_url(&self, url: &str, args: &PluginFileArgs) -> i64 {
        if args.file_area() != "content" {
            return 0;
        }

        CONTENT_REVISION
            .captures(url)
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    }

    fn remove_revision(&self, url: &str, args: &PluginFileArgs) -> String {
        if args.file_area() != "content" {
            return url.to_string();
        }

        CONTENT_REVISION.replace(url, "/content/0/").into_owned()
    }
}

/// Registry mapping a component discriminator to its strategy.
///
/// Resolution happens once per engine operation; the resolved strategy is
/// then passed down explicitly instead of being re-discovered at every
/// step.
pub struct StrategyRegistry {
    default: Arc<dyn PluginFileStrategy>,
    by_component: HashMap<String, Arc<dyn PluginFileStrategy>>,
}

impl StrategyRegistry {
    /// Create a registry with [`DefaultPluginFileStrategy`] as fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default: Arc::new(DefaultPluginFileStrategy::new()),
            by_component: HashMap::new(),
        }
    }

    /// Register a strategy for one component, replacing any previous one.
    pub fn register(&mut self, component: impl Into<String>, strategy: Arc<dyn PluginFileStrategy>) {
        self.by_component.insert(component.into(), strategy);
    }

    /// Resolve the strategy for a URL's arguments. Non-pluginfile URLs
    /// and unregistered components get the default strategy.
    #[must_use]
    pub fn strategy_for(&self, args: Option<&PluginFileArgs>) -> Arc<dyn PluginFileStrategy> {
        args.and_then(|a| self.by_component.get(a.component()))
            .map_or_else(|| Arc::clone(&self.default), Arc::clone)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str =
        "https://school.example/webservice/pluginfile.php/21/mod_page/content/5/notes.txt";

    #[test]
    fn test_parse_pluginfile_args() {
        let args = PluginFileArgs::from_url(PAGE_URL).unwrap();
        assert_eq!(args.context_id(), "21");
        assert_eq!(args.component(), "mod_page");
        assert_eq!(args.file_area(), "content");
        assert_eq!(args.segments().len(), 5);
    }

    #[test]
    fn test_parse_rejects_non_pluginfile() {
        assert!(PluginFileArgs::from_url("https://school.example/theme/image.php/boost/core").is_none());
        assert!(PluginFileArgs::from_url("https://school.example/pluginfile.php/21/a").is_none());
    }

    #[test]
    fn test_default_strategy_extracts_content_revision() {
        let strategy = DefaultPluginFileStrategy::new();
        let args = PluginFileArgs::from_url(PAGE_URL).unwrap();

        assert_eq!(strategy.revision_from_url(PAGE_URL, &args), 5);
        assert_eq!(
            strategy.remove_revision(PAGE_URL, &args),
            "https://school.example/webservice/pluginfile.php/21/mod_page/content/0/notes.txt"
        );
    }

    #[test]
    fn test_default_strategy_ignores_other_file_areas() {
        let url = "https://school.example/webservice/pluginfile.php/21/mod_forum/attachment/9/f.pdf";
        let strategy = DefaultPluginFileStrategy::new();
        let args = PluginFileArgs::from_url(url).unwrap();

        assert_eq!(strategy.revision_from_url(url, &args), 0);
        assert_eq!(strategy.remove_revision(url, &args), url);
    }

    #[test]
    fn test_registry_prefers_registered_component() {
        struct NeverDownloadable;

        #[async_trait]
        impl PluginFileStrategy for NeverDownloadable {
            fn is_downloadable(&self, _file: &RemoteFile) -> DownloadableCheck {
                DownloadableCheck::no("disabled for this content type")
            }
        }

        let mut registry = StrategyRegistry::new();
        registry.register("mod_page", Arc::new(NeverDownloadable));

        let args = PluginFileArgs::from_url(PAGE_URL);
        let strategy = registry.strategy_for(args.as_ref());
        let check = strategy.is_downloadable(&RemoteFile::new(PAGE_URL));
        assert!(!check.downloadable);

        // Other components still get the default.
        let other = PluginFileArgs::from_url(
            "https://school.example/webservice/pluginfile.php/21/mod_forum/attachment/9/f.pdf",
        );
        let strategy = registry.strategy_for(other.as_ref());
        assert!(
            strategy
                .is_downloadable(&RemoteFile::new("x"))
                .downloadable
        );
    }

    #[test]
    fn test_registry_default_for_non_pluginfile() {
        let registry = StrategyRegistry::new();
        let strategy = registry.strategy_for(None);
        assert!(strategy.is_downloadable(&RemoteFile::new("x")).downloadable);
    }
}
