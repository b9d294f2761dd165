pub mod context;
pub mod errors;
pub mod manifest;
pub mod patch;
pub mod platform;
pub mod registry;
pub mod target;
pub mod tool;

pub use context::{BuildOptions, PatchMode, Paths};
pub use errors::Error;
pub use manifest::{CacheVerdict, DownloadManifest, MANIFEST_FILE_NAME, RemotePackage, StaleReason};
pub use patch::{EmbeddedAsset, PatchContext, PatchReport, PreparedScript, Requirement, prepare_script};
pub use platform::{Arch, Host, Platform, Variant};
pub use registry::Registry;
pub use target::{BuildTarget, BuildTargetTemplate};
pub use tool::{BuildMeta, PatchProfile, ToolDescriptor, ToolSource, VendorAsset};
