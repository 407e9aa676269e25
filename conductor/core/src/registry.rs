//! Mode Registry
//!
//! A read-only catalogue of every loaded mode, indexed by id and kept in
//! registration order.
//!
//! # Design Philosophy
//!
//! The registry is built once through [`ModeRegistryBuilder`] and then frozen.
//! Nothing can mutate it after `build()`, so it is shared as a plain
//! `Arc<ModeRegistry>` across every session without any locking. All validation
//! (unique ids, well-formed definitions, a usable default mode) happens in
//! `build()`; a registry that exists is a valid one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::ids::ModeId;
use crate::mode::{DefaultMode, KeywordMode, Mode, ModeCategory, ModeDefinition};

/// Filter for [`ModeRegistry::list`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModeFilter {
    /// Only modes in this category
    pub category: Option<ModeCategory>,
    /// Skip disabled modes
    pub enabled_only: bool,
}

impl ModeFilter {
    /// Match every mode
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one category
    #[must_use]
    pub fn category(category: ModeCategory) -> Self {
        Self {
            category: Some(category),
            enabled_only: false,
        }
    }

    /// Skip disabled modes
    #[must_use]
    pub fn enabled_only(mut self) -> Self {
        self.enabled_only = true;
        self
    }

    fn matches(&self, definition: &ModeDefinition) -> bool {
        if self.enabled_only && !definition.enabled {
            return false;
        }
        self.category.map_or(true, |c| c == definition.category)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects modes and validates them into a [`ModeRegistry`]
#[derive(Default)]
pub struct ModeRegistryBuilder {
    modes: Vec<Arc<dyn Mode>>,
    default_mode: Option<ModeId>,
}

impl ModeRegistryBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mode
    #[must_use]
    pub fn register<M: Mode + 'static>(self, mode: M) -> Self {
        self.register_arc(Arc::new(mode))
    }

    /// Add an already shared mode
    #[must_use]
    pub fn register_arc(mut self, mode: Arc<dyn Mode>) -> Self {
        self.modes.push(mode);
        self
    }

    /// Add a data-driven [`KeywordMode`] for each definition
    #[must_use]
    pub fn register_definitions(mut self, definitions: impl IntoIterator<Item = ModeDefinition>) -> Self {
        for definition in definitions {
            self.modes.push(Arc::new(KeywordMode::new(definition)));
        }
        self
    }

    /// Name the default mode
    ///
    /// Without this, a mode registered under [`DefaultMode::ID`] is used, or
    /// the built-in [`DefaultMode`] is added.
    #[must_use]
    pub fn with_default(mut self, id: impl Into<ModeId>) -> Self {
        self.default_mode = Some(id.into());
        self
    }

    /// Validate and freeze
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`] found, checking definitions in
    /// registration order.
    pub fn build(self) -> Result<ModeRegistry, RegistryError> {
        let Self {
            mut modes,
            default_mode,
        } = self;

        let mut index = HashMap::with_capacity(modes.len() + 1);
        for (position, mode) in modes.iter().enumerate() {
            let definition = mode.definition();
            definition
                .validate()
                .map_err(|reason| RegistryError::InvalidDefinition {
                    id: definition.id.to_string(),
                    reason,
                })?;
            if index.insert(definition.id.clone(), position).is_some() {
                return Err(RegistryError::DuplicateModeId(definition.id.clone()));
            }
        }

        let default_id = match default_mode {
            Some(id) => {
                if !index.contains_key(&id) {
                    return Err(RegistryError::UnknownDefaultMode(id));
                }
                id
            }
            None => {
                let id = ModeId::from(DefaultMode::ID);
                if !index.contains_key(&id) {
                    index.insert(id.clone(), modes.len());
                    modes.push(Arc::new(DefaultMode::new()));
                }
                id
            }
        };

        let default_index = index[&default_id];
        if !modes[default_index].definition().enabled {
            return Err(RegistryError::DefaultModeDisabled(default_id));
        }

        tracing::info!(
            modes = modes.len(),
            default = %default_id,
            "Mode registry loaded"
        );

        Ok(ModeRegistry {
            modes,
            index,
            default_index,
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable catalogue of loaded modes
pub struct ModeRegistry {
    modes: Vec<Arc<dyn Mode>>,
    index: HashMap<ModeId, usize>,
    default_index: usize,
}

impl std::fmt::Debug for ModeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeRegistry")
            .field("modes", &self.modes.iter().map(|m| m.id()).collect::<Vec<_>>())
            .field("default", self.default_mode().id())
            .finish()
    }
}

impl ModeRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> ModeRegistryBuilder {
        ModeRegistryBuilder::new()
    }

    /// Build a registry of [`KeywordMode`]s from definitions
    ///
    /// # Errors
    ///
    /// Same as [`ModeRegistryBuilder::build`].
    pub fn from_definitions(
        definitions: Vec<ModeDefinition>,
        default_mode: Option<ModeId>,
    ) -> Result<Self, RegistryError> {
        let mut builder = Self::builder().register_definitions(definitions);
        if let Some(id) = default_mode {
            builder = builder.with_default(id);
        }
        builder.build()
    }

    /// Look a mode up by id
    #[must_use]
    pub fn get(&self, id: &ModeId) -> Option<&Arc<dyn Mode>> {
        self.index.get(id).map(|&i| &self.modes[i])
    }

    /// Look a definition up by id
    #[must_use]
    pub fn definition(&self, id: &ModeId) -> Option<&ModeDefinition> {
        self.get(id).map(|m| m.definition())
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &ModeId) -> bool {
        self.index.contains_key(id)
    }

    /// Modes in `category`, in registration order
    #[must_use]
    pub fn list_by_category(&self, category: ModeCategory) -> Vec<&Arc<dyn Mode>> {
        self.modes
            .iter()
            .filter(|m| m.definition().category == category)
            .collect()
    }

    /// Definitions matching `filter`, in registration order
    #[must_use]
    pub fn list(&self, filter: &ModeFilter) -> Vec<&ModeDefinition> {
        self.modes
            .iter()
            .map(|m| m.definition())
            .filter(|d| filter.matches(d))
            .collect()
    }

    /// Case-insensitive search over ids, names, keywords, triggers and descriptions
    ///
    /// Matches on id or name rank above keyword or trigger matches, which rank
    /// above description matches. Equal ranks keep registration order.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&ModeDefinition> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut ranked: Vec<(u8, &ModeDefinition)> = self
            .modes
            .iter()
            .map(|m| m.definition())
            .filter_map(|d| search_rank(d, &needle).map(|rank| (rank, d)))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, d)| d).collect()
    }

    /// Enabled modes in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Mode>> {
        self.modes.iter().filter(|m| m.definition().enabled)
    }

    /// All modes in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Mode>> {
        self.modes.iter()
    }

    /// The fallback/default mode
    #[must_use]
    pub fn default_mode(&self) -> &Arc<dyn Mode> {
        &self.modes[self.default_index]
    }

    /// Id of the fallback/default mode
    #[must_use]
    pub fn default_id(&self) -> &ModeId {
        self.default_mode().id()
    }

    /// Number of registered modes
    #[must_use]
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether the registry is empty (never true after `build`)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

fn search_rank(definition: &ModeDefinition, needle: &str) -> Option<u8> {
    let contains = |s: &str| s.to_lowercase().contains(needle);

    if contains(definition.id.as_str()) || contains(&definition.name) {
        Some(3)
    } else if definition.keywords.iter().chain(&definition.triggers).any(|k| contains(k)) {
        Some(2)
    } else if contains(&definition.description) {
        Some(1)
    } else {
        None
    }
}
