//! File pool events - discriminated union for file and package state
//! changes.
//!
//! Listeners subscribe through the event emitter port; per-file events are
//! additionally fanned out once per component link so components can watch
//! their own files without knowing file identities.

use serde::{Deserialize, Serialize};

use crate::status::DownloadStatus;
use crate::types::{ComponentLink, FileId, SiteId};

/// What happened to a pooled file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// A download attempt finished; the `success` flag tells how.
    Download,
    /// A download attempt started.
    Downloading,
    /// The file was removed from the pool.
    Deleted,
    /// The file was marked as outdated.
    Outdated,
}

/// Single discriminated union for all file pool events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilepoolEvent {
    /// State change of a single pooled file.
    FileStateChanged {
        /// Site the file belongs to.
        site_id: SiteId,
        /// Identity of the file.
        file_id: FileId,
        /// What happened.
        action: FileAction,
        /// Outcome for a finished download; absent for other actions.
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },

    /// The same state change, emitted once per component link of the file.
    ComponentFileStateChanged {
        /// Site the file belongs to.
        site_id: SiteId,
        /// Component owning the link.
        component: String,
        /// Component instance, normalized.
        component_id: String,
        /// Identity of the file.
        file_id: FileId,
        /// What happened.
        action: FileAction,
        /// Outcome for a finished download; absent for other actions.
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },

    /// Aggregate status change of a package.
    PackageStatusChanged {
        /// Site the package belongs to.
        site_id: SiteId,
        /// Component owning the package.
        component: String,
        /// Component instance, normalized.
        component_id: String,
        /// The new status.
        status: DownloadStatus,
    },
}

impl FilepoolEvent {
    /// Create a "download started" event.
    pub const fn downloading(site_id: SiteId, file_id: FileId) -> Self {
        Self::FileStateChanged {
            site_id,
            file_id,
            action: FileAction::Downloading,
            success: None,
        }
    }

    /// Create a successful download event.
    pub const fn downloaded(site_id: SiteId, file_id: FileId) -> Self {
        Self::FileStateChanged {
            site_id,
            file_id,
            action: FileAction::Download,
            success: Some(true),
        }
    }

    /// Create a failed download event.
    pub const fn download_failed(site_id: SiteId, file_id: FileId) -> Self {
        Self::FileStateChanged {
            site_id,
            file_id,
            action: FileAction::Download,
            success: Some(false),
        }
    }

    /// Create a file deleted event.
    pub const fn deleted(site_id: SiteId, file_id: FileId) -> Self {
        Self::FileStateChanged {
            site_id,
            file_id,
            action: FileAction::Deleted,
            success: None,
        }
    }

    /// Create a file outdated event.
    pub const fn outdated(site_id: SiteId, file_id: FileId) -> Self {
        Self::FileStateChanged {
            site_id,
            file_id,
            action: FileAction::Outdated,
            success: None,
        }
    }

    /// Create the per-component copy of a file event.
    pub fn component_file(
        site_id: SiteId,
        link: &ComponentLink,
        file_id: FileId,
        action: FileAction,
        success: Option<bool>,
    ) -> Self {
        Self::ComponentFileStateChanged {
            site_id,
            component: link.component.clone(),
            component_id: link.component_id.clone(),
            file_id,
            action,
            success,
        }
    }

    /// Create a package status changed event.
    pub fn package_status(
        site_id: SiteId,
        component: impl Into<String>,
        component_id: impl Into<String>,
        status: DownloadStatus,
    ) -> Self {
        Self::PackageStatusChanged {
            site_id,
            component: component.into(),
            component_id: component_id.into(),
            status,
        }
    }

    /// Get the file ID from any file-scoped event.
    #[must_use]
    pub const fn file_id(&self) -> Option<&FileId> {
        match self {
            Self::FileStateChanged { file_id, .. }
            | Self::ComponentFileStateChanged { file_id, .. } => Some(file_id),
            Self::PackageStatusChanged { .. } => None,
        }
    }

    /// Whether this event means the local bytes of a file changed: a
    /// successful download, or a deletion.
    #[must_use]
    pub const fn is_downloaded_or_deleted(&self) -> bool {
        match self {
            Self::FileStateChanged {
                action, success, ..
            }
            | Self::ComponentFileStateChanged {
                action, success, ..
            } => match action {
                FileAction::Download => matches!(success, Some(true)),
                FileAction::Deleted => true,
                FileAction::Downloading | FileAction::Outdated => false,
            },
            Self::PackageStatusChanged { .. } => false,
        }
    }

    /// Get the event name for wire protocols.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::FileStateChanged { .. } => "filepool:file",
            Self::ComponentFileStateChanged { .. } => "filepool:component_file",
            Self::PackageStatusChanged { .. } => "filepool:package_status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteId {
        SiteId::new("site1")
    }

    fn file() -> FileId {
        FileId::new("notes_0011223344556677")
    }

    #[test]
    fn test_event_serialization_uses_type_tag() {
        let event = FilepoolEvent::downloaded(site(), file());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"file_state_changed\""));
        assert!(json.contains("\"action\":\"download\""));

        let parsed: FilepoolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_success_flag_omitted_when_absent() {
        let event = FilepoolEvent::downloading(site(), file());
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("success"));
    }

    #[test]
    fn test_is_downloaded_or_deleted() {
        assert!(FilepoolEvent::downloaded(site(), file()).is_downloaded_or_deleted());
        assert!(FilepoolEvent::deleted(site(), file()).is_downloaded_or_deleted());
        assert!(!FilepoolEvent::download_failed(site(), file()).is_downloaded_or_deleted());
        assert!(!FilepoolEvent::downloading(site(), file()).is_downloaded_or_deleted());
        assert!(!FilepoolEvent::outdated(site(), file()).is_downloaded_or_deleted());
    }

    #[test]
    fn test_component_fan_out_copies_link() {
        let link = ComponentLink::new("mod_page", Some("12"));
        let event = FilepoolEvent::component_file(
            site(),
            &link,
            file(),
            FileAction::Download,
            Some(true),
        );

        match event {
            FilepoolEvent::ComponentFileStateChanged {
                component,
                component_id,
                ..
            } => {
                assert_eq!(component, "mod_page");
                assert_eq!(component_id, "12");
            }
            _ => panic!("Expected ComponentFileStateChanged"),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            FilepoolEvent::downloaded(site(), file()).event_name(),
            "filepool:file"
        );
        assert_eq!(
            FilepoolEvent::package_status(site(), "mod_scorm", "3", DownloadStatus::Downloaded)
                .event_name(),
            "filepool:package_status"
        );
    }
}
