//! Database configuration.

use crate::options::{DatabaseOption, TransactionOption};

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Options applied to the database handle when it is opened.
    pub database_options: Vec<DatabaseOption>,

    /// Options applied to every transaction the database creates,
    /// including each retry attempt inside `transact`.
    pub transaction_defaults: Vec<TransactionOption>,

    /// Attempt number at which `transact` logs a warning about a
    /// transaction that keeps retrying (0 = never).
    pub retry_warn_threshold: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_options: Vec::new(),
            transaction_defaults: Vec::new(),
            retry_warn_threshold: 10,
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option applied to the database handle on open.
    #[must_use]
    pub fn database_option(mut self, option: DatabaseOption) -> Self {
        self.database_options.push(option);
        self
    }

    /// Adds an option applied to every new transaction.
    #[must_use]
    pub fn transaction_default(mut self, option: TransactionOption) -> Self {
        self.transaction_defaults.push(option);
        self
    }

    /// Sets the attempt number at which retries are logged as warnings.
    #[must_use]
    pub const fn retry_warn_threshold(mut self, attempts: u32) -> Self {
        self.retry_warn_threshold = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DatabaseConfig::default();
        assert!(config.database_options.is_empty());
        assert!(config.transaction_defaults.is_empty());
        assert_eq!(config.retry_warn_threshold, 10);
    }

    #[test]
    fn builder_pattern() {
        let config = DatabaseConfig::new()
            .database_option(DatabaseOption::MaxWatches(100))
            .transaction_default(TransactionOption::Timeout(5_000))
            .transaction_default(TransactionOption::RetryLimit(3))
            .retry_warn_threshold(2);

        assert_eq!(config.database_options, vec![DatabaseOption::MaxWatches(100)]);
        assert_eq!(config.transaction_defaults.len(), 2);
        assert_eq!(config.retry_warn_threshold, 2);
    }
}
