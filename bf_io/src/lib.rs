pub mod cache;
pub mod compiler;
pub mod download;
pub mod extract;
pub mod fetch;
pub mod github;
pub mod integrity;
pub mod npm;
pub mod orchestrator;
pub mod partial;
pub mod prepare;
pub mod progress;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{CachedPackage, check_if_up_to_date, clear_cache, list_cached, read_manifest, write_manifest};
pub use compiler::{CompileOutput, CompileRequest, CompilerBackend, CompilerLocator, ExternalCompiler};
pub use download::{Downloaded, Downloader};
pub use extract::{ExtractStrategy, extract_tar_gz, extract_zip};
pub use fetch::{FetchOptions, FetchOutcome, ToolFetcher};
pub use github::{GitHubClient, Release, ReleaseAsset, select_asset};
pub use integrity::Integrity;
pub use npm::{NpmClient, PackageVersion};
pub use orchestrator::{BuildOrchestrator, BuildResult};
pub use prepare::{PreparedSource, clean_prepared_sources, prepare_source, prepared_source_path};
pub use progress::{BuildEvent, ProgressCallback};
