/// Default build configuration file name.
pub const CONFIG_FILENAME: &str = "bootseq.toml";

/// Environment variable carrying the database connection URL at runtime.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable overriding the listener host at runtime.
pub const HOST_ENV: &str = "BOOTSEQ_HOST";

/// Default listener host: all interfaces.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default build context directory, relative to the working directory.
pub const DEFAULT_CONTEXT_DIR: &str = ".bootseq/context";
