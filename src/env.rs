//! Environment constants for the test-server orchestrator.
//!
//! This module centralizes the engine conventions, limits and timeouts used
//! throughout the application, making them easier to maintain and modify.

use std::time::Duration;

/// Default container engine CLI
pub const DEFAULT_ENGINE_PROGRAM: &str = "docker";

/// Configuration file name looked up in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "sts.toml";

/// Per-user configuration directory name (under `$HOME`)
pub const USER_CONFIG_DIR_NAME: &str = ".sts";

/// Per-user configuration file name
pub const USER_CONFIG_FILE_NAME: &str = "config.toml";

/// Engine naming and labelling conventions
pub mod engine {
    /// Prefix for generated container names
    pub const DEFAULT_NAME_PREFIX: &str = "simple-test-server";

    /// Label attached to every container this service starts
    pub const DEFAULT_MANAGEMENT_LABEL: &str = "managed_by=simple-test-server";

    /// Image names containing this marker are built locally, never pulled
    pub const CUSTOM_IMAGE_MARKER: &str = "simple-test-server-custom-";

    /// Directory holding one build context per custom image
    pub const DEFAULT_CUSTOM_IMAGES_DIR: &str = "./custom_images";
}

/// Timeouts for engine invocations
pub mod timeouts {
    use super::Duration;

    pub const IMAGE_INSPECT: Duration = Duration::from_secs(60);
    pub const IMAGE_BUILD: Duration = Duration::from_secs(60);
    pub const IMAGE_PULL: Duration = Duration::from_secs(180);
    pub const CONTAINER_RUN: Duration = Duration::from_secs(60);
    pub const CONTAINER_INSPECT: Duration = Duration::from_secs(10);
    pub const CONTAINER_COPY: Duration = Duration::from_secs(30);
    pub const DIR_LISTING: Duration = Duration::from_secs(5);
    pub const LOG_FETCH: Duration = Duration::from_secs(10);
    pub const MAIL_API: Duration = Duration::from_secs(10);
}

/// Progress hub limits
pub mod progress {
    use super::Duration;

    /// Events buffered per request id before sends are dropped
    pub const CHANNEL_CAPACITY: usize = 16;

    /// Ceiling after which a channel is removed even if never drained
    pub const IDLE_TTL: Duration = Duration::from_secs(10 * 60);

    /// Grace period between the final event and channel removal
    pub const COMPLETION_GRACE: Duration = Duration::from_secs(30);

    /// Silence after which a keepalive frame is emitted
    pub const KEEPALIVE: Duration = Duration::from_secs(30);
}

/// Introspection limits
pub mod introspection {
    /// Upper bound for a single log line, in bytes
    pub const MAX_LINE_LEN: usize = 8192;

    pub const DEFAULT_TAIL: usize = 500;
    pub const MAX_TAIL: usize = 5000;

    /// Lines replayed before following a live log
    pub const STREAM_TAIL_SEED: usize = 50;

    /// Default line count for the raw log endpoint
    pub const DEFAULT_RAW_TAIL: usize = 200;

    pub const DEFAULT_MAX_ENTRIES: usize = 500;
}

/// Upload limits
pub mod upload {
    /// Default maximum upload size (10 MiB)
    pub const DEFAULT_MAX_BYTES: u64 = 10 << 20;

    /// Bytes inspected to sniff the content type
    pub const SNIFF_LEN: usize = 512;

    /// Maximum length of a sanitized file stem
    pub const MAX_STEM_LEN: usize = 64;
}
