use std::path::PathBuf;

/// Configuration for a CaskDB database
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent directory under which database directories are created
    pub data_dir: PathBuf,

    /// Size threshold after which the active data file is rotated (default: 2GiB)
    ///
    /// This is a soft ceiling: a single record larger than the threshold is
    /// still written, in a data file of its own.
    pub max_data_file_size: u64,

    /// Minimum data file size before merge considers it (default: 0, merge everything)
    pub merge_min_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./"),
            max_data_file_size: 2 * 1024 * 1024 * 1024, // 2GiB
            merge_min_bytes: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given parent data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the data file rotation threshold
    pub fn max_data_file_size(mut self, size: u64) -> Self {
        self.max_data_file_size = size;
        self
    }

    /// Set the minimum data file size considered by merge
    pub fn merge_min_bytes(mut self, size: u64) -> Self {
        self.merge_min_bytes = size;
        self
    }
}
