//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! The closed command set and the payload/result shape of each command.

use std::path::PathBuf;

use corelink_common::ReleaseChannel;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Wire names of every command the core handles.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
#[allow(missing_docs)]
pub enum CommandName {
    GetRuntimePath,
    GetInitialRuntimePath,
    ValidateRuntimePath,
    ChangeRuntimePath,
    CheckForUpdate,
    InstallUpdate,
    Relaunch,
    OpenExternalLink,
    CopyToClipboard,
    OpenFileDialog,
    ShowSaveDialog,
    OpenFolder,
    #[serde(rename = "getCurrentOS")]
    #[strum(serialize = "getCurrentOS")]
    GetCurrentOs,
}

/// How long the gateway waits for a response when the caller gives no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// The gateway's configured default timeout.
    Default,
    /// No gateway deadline. The caller bounds the wait with its own budget.
    Unbounded,
}

/// A typed command: its wire name, payload (the implementing type) and result shape.
pub trait Request: Serialize + Send + Sync {
    /// Wire name.
    const NAME: CommandName;
    /// Deadline applied by [`Deadline`] policy.
    const DEADLINE: Deadline = Deadline::Default;
    /// The core replaces its process while handling this command, so a
    /// dropped connection after sending counts as success.
    const REPLACES_PROCESS: bool = false;
    /// Decoded result of a successful response.
    type Response: DeserializeOwned + Send + 'static;
}

/// Empty acknowledgement returned by side-effect commands.
///
/// Accepts any result payload, including a missing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack;

impl<'de> Deserialize<'de> for Ack {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Ack)
    }
}

impl Serialize for Ack {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// Result of the runtime-path queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePathInfo {
    /// Absolute runtime directory.
    pub path: PathBuf,
}

/// Verdict of `validateRuntimePath`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathValidity {
    /// Path does not exist yet and can be created.
    Valid,
    /// Path is unusable: the current path, a file, or a foreign non-empty directory.
    Invalid,
    /// Non-empty directory the user may adopt after confirmation.
    PotentiallyValid,
}

impl PathValidity {
    /// Whether a migration may proceed to the change step.
    pub fn is_acceptable(self) -> bool {
        !matches!(self, PathValidity::Invalid)
    }
}

/// Result of `validateRuntimePath`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Verdict from the core.
    pub validity: PathValidity,
    /// Optional explanation shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of `checkForUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    /// Whether the core found a newer release.
    #[serde(default)]
    pub update_available: bool,
    /// Version of the newest release on the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Filter shown in native file dialogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter {
    /// Display name, e.g. `Archives`.
    pub name: String,
    /// Extensions without the leading dot.
    pub extensions: Vec<String>,
}

/// Result of `openFileDialog`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileDialogResult {
    /// Whether the user dismissed the dialog.
    #[serde(default)]
    pub canceled: bool,
    /// Selected paths.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Result of `showSaveDialog`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaveDialogResult {
    /// Whether the user dismissed the dialog.
    #[serde(default)]
    pub canceled: bool,
    /// Chosen destination.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Result of `getCurrentOS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    /// Host platform, e.g. `linux`, `darwin`, `win32`.
    pub platform: String,
    /// CPU architecture, e.g. `x64`, `arm64`.
    pub arch: String,
}

macro_rules! empty_request {
    ($(#[$meta:meta])* $name:ident => $command:ident, $response:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {}

        impl Request for $name {
            const NAME: CommandName = CommandName::$command;
            type Response = $response;
        }
    };
}

empty_request!(
    /// Current runtime directory.
    GetRuntimePath => GetRuntimePath, RuntimePathInfo
);
empty_request!(
    /// Default runtime directory for a fresh install.
    GetInitialRuntimePath => GetInitialRuntimePath, RuntimePathInfo
);
empty_request!(
    /// Core-side details about the host.
    GetCurrentOs => GetCurrentOs, OsInfo
);

/// Apply a downloaded update. The core exits while installing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallUpdate {}

impl Request for InstallUpdate {
    const NAME: CommandName = CommandName::InstallUpdate;
    const REPLACES_PROCESS: bool = true;
    type Response = Ack;
}

/// Restart the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relaunch {}

impl Request for Relaunch {
    const NAME: CommandName = CommandName::Relaunch;
    const REPLACES_PROCESS: bool = true;
    type Response = Ack;
}

/// Ask the core whether a directory can hold the runtime assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateRuntimePath {
    /// Candidate directory.
    pub path: PathBuf,
}

impl Request for ValidateRuntimePath {
    const NAME: CommandName = CommandName::ValidateRuntimePath;
    type Response = ValidationReport;
}

/// Move the runtime assets to a new directory. Progress arrives as events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRuntimePath {
    /// Destination directory.
    pub path: PathBuf,
}

impl Request for ChangeRuntimePath {
    const NAME: CommandName = CommandName::ChangeRuntimePath;
    const DEADLINE: Deadline = Deadline::Unbounded;
    type Response = Ack;
}

/// Query the release feed for a newer version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckForUpdate {
    /// Release channel to query.
    pub channel: ReleaseChannel,
}

impl Request for CheckForUpdate {
    const NAME: CommandName = CommandName::CheckForUpdate;
    type Response = UpdateCheck;
}

/// Open a URL in the default browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenExternalLink {
    /// Target URL.
    pub url: String,
}

impl Request for OpenExternalLink {
    const NAME: CommandName = CommandName::OpenExternalLink;
    type Response = Ack;
}

/// Write text to the system clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyToClipboard {
    /// Clipboard contents.
    pub text: String,
}

impl Request for CopyToClipboard {
    const NAME: CommandName = CommandName::CopyToClipboard;
    type Response = Ack;
}

/// Show a native open-file dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFileDialog {
    /// Dialog title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Selectable file types.
    #[serde(default)]
    pub filters: Vec<FileFilter>,
}

// Stays open until the user answers; bound it with `call_within` if needed.
impl Request for OpenFileDialog {
    const NAME: CommandName = CommandName::OpenFileDialog;
    const DEADLINE: Deadline = Deadline::Unbounded;
    type Response = FileDialogResult;
}

/// Show a native save dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowSaveDialog {
    /// Dialog title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Pre-filled destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<PathBuf>,
    /// Selectable file types.
    #[serde(default)]
    pub filters: Vec<FileFilter>,
}

// Stays open until the user answers; bound it with `call_within` if needed.
impl Request for ShowSaveDialog {
    const NAME: CommandName = CommandName::ShowSaveDialog;
    const DEADLINE: Deadline = Deadline::Unbounded;
    type Response = SaveDialogResult;
}

/// Reveal a directory in the platform file manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFolder {
    /// Directory to open.
    pub path: PathBuf,
}

impl Request for OpenFolder {
    const NAME: CommandName = CommandName::OpenFolder;
    type Response = Ack;
}
