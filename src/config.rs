use std::env;

/// Records fetched per page query.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Chunks at or below this length are processed in one transaction without
/// further splitting.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 10;

fn lookup_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Runtime configuration for a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    pub page_size: usize,
    pub split_threshold: usize,
    pub worker_threads: usize,
    /// Database connections: one per worker plus the page cursor and the count.
    pub max_connections: u32,
}

impl MigrationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Missing, zero or
    /// unparsable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let worker_threads = lookup_usize(&lookup, "VAULT_MIGRATION_WORKERS", num_cpus::get());
        let max_connections = lookup_usize(
            &lookup,
            "VAULT_MIGRATION_DB_CONNECTIONS",
            worker_threads + 2,
        );

        Self {
            page_size: lookup_usize(&lookup, "VAULT_MIGRATION_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            split_threshold: lookup_usize(
                &lookup,
                "VAULT_MIGRATION_SPLIT_THRESHOLD",
                DEFAULT_SPLIT_THRESHOLD,
            ),
            worker_threads,
            // The page cursor holds one connection for the whole page.
            max_connections: u32::try_from(max_connections.max(2)).unwrap_or(u32::MAX),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_split_threshold(mut self, split_threshold: usize) -> Self {
        self.split_threshold = split_threshold.max(1);
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(2);
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> MigrationConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MigrationConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.split_threshold, DEFAULT_SPLIT_THRESHOLD);
        assert_eq!(config.worker_threads, num_cpus::get());
        assert_eq!(config.max_connections as usize, num_cpus::get() + 2);
    }

    #[test]
    fn test_reads_overrides() {
        let config = config_from(&[
            ("VAULT_MIGRATION_PAGE_SIZE", "250"),
            ("VAULT_MIGRATION_SPLIT_THRESHOLD", " 4 "),
            ("VAULT_MIGRATION_WORKERS", "3"),
        ]);
        assert_eq!(config.page_size, 250);
        assert_eq!(config.split_threshold, 4);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_zero_and_garbage_fall_back() {
        let config = config_from(&[
            ("VAULT_MIGRATION_PAGE_SIZE", "0"),
            ("VAULT_MIGRATION_SPLIT_THRESHOLD", "ten"),
        ]);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.split_threshold, DEFAULT_SPLIT_THRESHOLD);
    }

    #[test]
    fn test_single_connection_is_raised_to_two() {
        let config = config_from(&[
            ("VAULT_MIGRATION_WORKERS", "4"),
            ("VAULT_MIGRATION_DB_CONNECTIONS", "1"),
        ]);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn test_builders_clamp_to_minimums() {
        let config = config_from(&[])
            .with_page_size(0)
            .with_split_threshold(0)
            .with_worker_threads(0)
            .with_max_connections(0);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.split_threshold, 1);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.max_connections, 2);
    }
}
