//! Alias → repository routing for several database targets.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::drivers::ConnectionProvider;
use crate::error::{LoadError, Result};

use super::Repository;

/// Repositories keyed by lower-case alias.
#[derive(Debug, Clone, Default)]
pub struct RepositoryRouter {
    repositories: BTreeMap<String, Repository>,
}

impl RepositoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One lazily connected repository per configured alias. No connection
    /// is opened here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut router = Self::new();
        for (alias, db) in &config.databases {
            let provider = ConnectionProvider::new(db.clone())?;
            debug!("Registered alias '{}' -> {}", alias, db.describe());
            let mut repo = Repository::new(Arc::new(provider)).with_loader_config(config.loader.clone());
            if let Some(schema) = &db.schema {
                repo = repo.with_default_schema(schema.clone());
            }
            router.register(alias, repo);
        }
        Ok(router)
    }

    /// Register or replace the repository for `alias`.
    pub fn register(&mut self, alias: &str, repository: Repository) {
        self.repositories.insert(alias.to_lowercase(), repository);
    }

    /// Repository for `alias` (case-insensitive).
    pub fn for_alias(&self, alias: &str) -> Result<Repository> {
        self.repositories
            .get(&alias.to_lowercase())
            .cloned()
            .ok_or_else(|| LoadError::UnknownAlias {
                alias: alias.to_string(),
                available: if self.repositories.is_empty() {
                    "none".to_string()
                } else {
                    self.aliases().join(", ")
                },
            })
    }

    /// Registered aliases in sorted order.
    pub fn aliases(&self) -> Vec<String> {
        self.repositories.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Repository)> {
        self.repositories.iter().map(|(alias, repo)| (alias.as_str(), repo))
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}
