//! Include/exclude filtering of listed document names.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::StoreConfig;
use crate::models::StoreItem;

/// Glob filter applied to item names before change detection.
pub struct NameFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl NameFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        Self::new(&store.include_globs, &store.exclude_globs)
    }

    pub fn matches(&self, name: &str) -> bool {
        !self.exclude.is_match(name) && self.include.is_match(name)
    }

    /// Keep only the items whose names pass the filter.
    pub fn apply(&self, items: Vec<StoreItem>) -> Vec<StoreItem> {
        items
            .into_iter()
            .filter(|item| self.matches(&item.name))
            .collect()
    }
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
