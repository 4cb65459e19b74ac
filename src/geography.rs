//! Geographic Hierarchy Resolver
//!
//! Dependent provincia → cantón → distrito selection chain.
//!
//! - Lists are fetched lazily and cached per parent key for the resolver's
//!   lifetime. The cache is shared; the first resolved fetch for a key wins.
//! - Every fetch that feeds a visible level carries a version token. A
//!   response is applied only if its token is still the level's expected
//!   token, so a response for a superseded parent is dropped.
//! - Selection changes go through [`ResolverState::apply`], which resets all
//!   descendant levels.

use crate::backend::LookupBackend;
use crate::error::{LookupError, Result};
use crate::models::{GeoLevel, GeographicNode, GeographyFilter};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    level: GeoLevel,
    parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum LevelStatus {
    Idle,
    Loading,
    Loaded,
    LoadError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Selection {
    pub provincia: Option<String>,
    pub canton: Option<String>,
    pub distrito: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    Provincia(Option<String>),
    Canton(Option<String>),
    Distrito(Option<String>),
}

impl SelectionEvent {
    fn level(&self) -> GeoLevel {
        match self {
            SelectionEvent::Provincia(_) => GeoLevel::Provincia,
            SelectionEvent::Canton(_) => GeoLevel::Canton,
            SelectionEvent::Distrito(_) => GeoLevel::Distrito,
        }
    }
}

/// Result of a load that feeds a visible level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied(Arc<Vec<GeographicNode>>),
    /// The selection moved on while the fetch was in flight.
    Stale,
}

#[derive(Debug, Clone)]
struct LevelState {
    status: LevelStatus,
    expected_token: u64,
    items: Arc<Vec<GeographicNode>>,
}

impl Default for LevelState {
    fn default() -> Self {
        Self {
            status: LevelStatus::Idle,
            expected_token: 0,
            items: Arc::new(Vec::new()),
        }
    }
}

impl LevelState {
    /// Back to `Idle`; any in-flight token is invalidated.
    fn reset(&mut self) {
        self.status = LevelStatus::Idle;
        self.expected_token += 1;
        self.items = Arc::new(Vec::new());
    }
}

/// Selection plus per-level load state. Every mutation is synchronous.
#[derive(Debug, Clone, Default)]
pub struct ResolverState {
    selection: Selection,
    levels: [LevelState; 3],
}

impl ResolverState {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn status(&self, level: GeoLevel) -> &LevelStatus {
        &self.levels[level.index()].status
    }

    pub fn items(&self, level: GeoLevel) -> Arc<Vec<GeographicNode>> {
        self.levels[level.index()].items.clone()
    }

    pub fn expected_token(&self, level: GeoLevel) -> u64 {
        self.levels[level.index()].expected_token
    }

    /// Hierarchical invalidation: changing a level clears every level below it.
    pub fn apply(&mut self, event: SelectionEvent) {
        let changed = event.level();
        match event {
            SelectionEvent::Provincia(id) => {
                if self.selection.provincia == id {
                    return;
                }
                self.selection.provincia = id;
                self.selection.canton = None;
                self.selection.distrito = None;
            }
            SelectionEvent::Canton(id) => {
                if self.selection.canton == id {
                    return;
                }
                self.selection.canton = id;
                self.selection.distrito = None;
            }
            SelectionEvent::Distrito(id) => {
                self.selection.distrito = id;
                return;
            }
        }
        let descendants = match changed {
            GeoLevel::Provincia => &[GeoLevel::Canton, GeoLevel::Distrito][..],
            GeoLevel::Canton => &[GeoLevel::Distrito][..],
            GeoLevel::Distrito => &[][..],
        };
        for level in descendants {
            self.levels[level.index()].reset();
        }
    }

    fn begin_load(&mut self, level: GeoLevel) -> u64 {
        let state = &mut self.levels[level.index()];
        state.expected_token += 1;
        state.status = LevelStatus::Loading;
        state.expected_token
    }

    /// Applies a finished fetch if `token` is still current.
    fn complete_load(
        &mut self,
        level: GeoLevel,
        token: u64,
        outcome: &Result<Arc<Vec<GeographicNode>>>,
    ) -> bool {
        let state = &mut self.levels[level.index()];
        if state.expected_token != token {
            return false;
        }
        match outcome {
            Ok(items) => {
                state.items = items.clone();
                state.status = LevelStatus::Loaded;
            }
            Err(e) => {
                state.items = Arc::new(Vec::new());
                state.status = LevelStatus::LoadError(e.to_string());
            }
        }
        true
    }
}

pub struct GeographicResolver {
    backend: Arc<dyn LookupBackend>,
    cache: DashMap<CacheKey, Arc<Vec<GeographicNode>>>,
    state: Mutex<ResolverState>,
}

impl GeographicResolver {
    pub fn new(backend: Arc<dyn LookupBackend>) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            state: Mutex::new(ResolverState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn cached_fetch(&self, level: GeoLevel, parent: Option<&str>) -> Result<Arc<Vec<GeographicNode>>> {
        let key = CacheKey {
            level,
            parent: parent.map(String::from),
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }

        let entries = match (level, parent) {
            (GeoLevel::Provincia, _) => self.backend.provincias().await?,
            (GeoLevel::Canton, Some(id)) => self.backend.cantones(id).await?,
            (GeoLevel::Distrito, Some(id)) => self.backend.distritos(id).await?,
            (_, None) => {
                return Err(LookupError::Validation(format!(
                    "{:?} list requires a parent id",
                    level
                )))
            }
        };
        let nodes: Vec<GeographicNode> = entries
            .into_iter()
            .map(|entry| entry.into_node(level, parent))
            .collect();
        debug!("Fetched {} {:?} nodes (parent: {:?})", nodes.len(), level, parent);

        // First writer wins; a duplicate fetch for the same key is discarded.
        let stored = self.cache.entry(key).or_insert_with(|| Arc::new(nodes));
        Ok(Arc::clone(stored.value()))
    }

    pub async fn list_provincias(&self) -> Result<Arc<Vec<GeographicNode>>> {
        self.cached_fetch(GeoLevel::Provincia, None).await
    }

    pub async fn list_cantones(&self, provincia_id: &str) -> Result<Arc<Vec<GeographicNode>>> {
        self.cached_fetch(GeoLevel::Canton, Some(provincia_id)).await
    }

    pub async fn list_distritos(&self, canton_id: &str) -> Result<Arc<Vec<GeographicNode>>> {
        self.cached_fetch(GeoLevel::Distrito, Some(canton_id)).await
    }

    pub fn is_cached(&self, level: GeoLevel, parent: Option<&str>) -> bool {
        self.cache.contains_key(&CacheKey {
            level,
            parent: parent.map(String::from),
        })
    }

    async fn load_level(&self, level: GeoLevel) -> Result<LoadOutcome> {
        let (token, parent) = {
            let mut state = self.lock();
            let parent = match level {
                GeoLevel::Provincia => None,
                GeoLevel::Canton => Some(state.selection.provincia.clone().ok_or_else(|| {
                    LookupError::Validation("select a provincia before loading cantones".to_string())
                })?),
                GeoLevel::Distrito => Some(state.selection.canton.clone().ok_or_else(|| {
                    LookupError::Validation("select a canton before loading distritos".to_string())
                })?),
            };
            (state.begin_load(level), parent)
        };

        let outcome = self.cached_fetch(level, parent.as_deref()).await;

        let applied = self.lock().complete_load(level, token, &outcome);
        if !applied {
            info!(
                "Discarding stale {:?} response for parent {:?} (token {})",
                level, parent, token
            );
            return Ok(LoadOutcome::Stale);
        }
        match outcome {
            Ok(items) => Ok(LoadOutcome::Applied(items)),
            Err(e) => {
                warn!("Failed to load {:?} list: {}", level, e);
                Err(e)
            }
        }
    }

    /// Loads provincias into the visible selection chain.
    pub async fn load_provincias(&self) -> Result<LoadOutcome> {
        self.load_level(GeoLevel::Provincia).await
    }

    /// Loads cantones for the selected provincia.
    pub async fn load_cantones(&self) -> Result<LoadOutcome> {
        self.load_level(GeoLevel::Canton).await
    }

    /// Loads distritos for the selected canton.
    pub async fn load_distritos(&self) -> Result<LoadOutcome> {
        self.load_level(GeoLevel::Distrito).await
    }

    /// Selects a provincia; canton and distrito are cleared immediately.
    pub fn select_provincia(&self, provincia_id: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        if let Some(id) = provincia_id {
            let visible = state.items(GeoLevel::Provincia);
            if *state.status(GeoLevel::Provincia) == LevelStatus::Loaded
                && !visible.iter().any(|n| n.id == id)
            {
                return Err(LookupError::Validation(format!("unknown provincia '{}'", id)));
            }
        }
        state.apply(SelectionEvent::Provincia(provincia_id.map(String::from)));
        Ok(())
    }

    /// Selects a canton; it must belong to the selected provincia.
    pub fn select_canton(&self, canton_id: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        if let Some(id) = canton_id {
            Self::require_visible(&state, GeoLevel::Canton, id)?;
        }
        state.apply(SelectionEvent::Canton(canton_id.map(String::from)));
        Ok(())
    }

    /// Selects a distrito; it must belong to the selected canton.
    pub fn select_distrito(&self, distrito_id: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        if let Some(id) = distrito_id {
            Self::require_visible(&state, GeoLevel::Distrito, id)?;
        }
        state.apply(SelectionEvent::Distrito(distrito_id.map(String::from)));
        Ok(())
    }

    fn require_visible(state: &ResolverState, level: GeoLevel, id: &str) -> Result<()> {
        let parent = match level {
            GeoLevel::Provincia => None,
            GeoLevel::Canton => state.selection.provincia.as_deref(),
            GeoLevel::Distrito => state.selection.canton.as_deref(),
        };
        let belongs = state
            .items(level)
            .iter()
            .any(|n| n.id == id && n.parent_id.as_deref() == parent);
        if belongs {
            Ok(())
        } else {
            Err(LookupError::Validation(format!(
                "{:?} '{}' does not belong to the current selection",
                level, id
            )))
        }
    }

    pub fn selection(&self) -> Selection {
        self.lock().selection.clone()
    }

    pub fn status(&self, level: GeoLevel) -> LevelStatus {
        self.lock().status(level).clone()
    }

    /// Nodes currently shown for `level`.
    pub fn visible(&self, level: GeoLevel) -> Arc<Vec<GeographicNode>> {
        self.lock().items(level)
    }

    /// Geographic part of a search filter built from the current selection.
    pub fn filter(&self) -> GeographyFilter {
        let selection = self.selection();
        GeographyFilter {
            provincia_id: selection.provincia,
            canton_id: selection.canton,
            distrito_id: selection.distrito,
            ..Default::default()
        }
    }
}
