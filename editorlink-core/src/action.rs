//! Automation action routing
//!
//! Clients spell actions loosely (`blueprint_create`, `BlueprintCreate`,
//! `create-blueprint`). The router folds every spelling through one
//! normalization step and a lookup table built once at startup.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::CoalesceError;
use crate::key::CoalesceKey;
use crate::path_utils::{normalize_content_path, CONTENT_ROOT};

/// Prefixes of action names that only read editor state
const READ_ONLY_PREFIXES: &[&str] = &["list", "get_", "exists", "search", "find"];

/// Known automation actions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    BlueprintCreate,
    MaterialCreate,
    NiagaraSystemCreate,
    SoundCueCreate,
    LevelSequenceCreate,
    ExecutePython,
    ListAssets,
    GetAsset,
    AssetExists,
    SearchAssets,
    FindActors,
    SpawnActor,
    DeleteAsset,
    BlueprintModifyScs,
    BlueprintAddVariable,
    BlueprintAddEvent,
    BlueprintAddFunction,
    BlueprintSetDefault,
    /// Anything not in the table, forwarded under its original name
    Other(String),
}

/// How requests for an action are deduplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// One creation per action and `savePath/name`
    Asset,
    /// One execution per trimmed script
    Script,
    /// One query per action and canonical payload
    Query,
    /// Every request goes to the editor
    Never,
}

impl Action {
    /// Canonical wire name sent to the editor plugin
    pub fn name(&self) -> &str {
        match self {
            Action::BlueprintCreate => "blueprint_create",
            Action::MaterialCreate => "create_material",
            Action::NiagaraSystemCreate => "create_niagara_system",
            Action::SoundCueCreate => "create_sound_cue",
            Action::LevelSequenceCreate => "create_level_sequence",
            Action::ExecutePython => "execute_editor_python",
            Action::ListAssets => "list_assets",
            Action::GetAsset => "get_asset",
            Action::AssetExists => "exists_asset",
            Action::SearchAssets => "search_assets",
            Action::FindActors => "find_actors",
            Action::SpawnActor => "spawn_actor",
            Action::DeleteAsset => "delete_asset",
            Action::BlueprintModifyScs => "blueprint_modify_scs",
            Action::BlueprintAddVariable => "blueprint_add_variable",
            Action::BlueprintAddEvent => "blueprint_add_event",
            Action::BlueprintAddFunction => "blueprint_add_function",
            Action::BlueprintSetDefault => "blueprint_set_default",
            Action::Other(name) => name,
        }
    }

    pub fn policy(&self) -> CoalescePolicy {
        match self {
            Action::BlueprintCreate
            | Action::MaterialCreate
            | Action::NiagaraSystemCreate
            | Action::SoundCueCreate
            | Action::LevelSequenceCreate => CoalescePolicy::Asset,
            Action::ExecutePython => CoalescePolicy::Script,
            Action::ListAssets
            | Action::GetAsset
            | Action::AssetExists
            | Action::SearchAssets
            | Action::FindActors => CoalescePolicy::Query,
            Action::SpawnActor | Action::DeleteAsset => CoalescePolicy::Never,
            Action::BlueprintModifyScs
            | Action::BlueprintAddVariable
            | Action::BlueprintAddEvent
            | Action::BlueprintAddFunction
            | Action::BlueprintSetDefault => CoalescePolicy::Never,
            Action::Other(name) => {
                if READ_ONLY_PREFIXES.iter().any(|p| name.starts_with(p)) {
                    CoalescePolicy::Query
                } else {
                    CoalescePolicy::Never
                }
            }
        }
    }

    /// Folder the editor creates the asset in when `savePath` is absent
    pub fn default_save_path(&self) -> &'static str {
        match self {
            Action::BlueprintCreate => "/Game/Blueprints",
            Action::LevelSequenceCreate => "/Game/Sequences",
            _ => CONTENT_ROOT,
        }
    }

    /// Whether the action edits an existing Blueprint in place
    pub fn mutates_blueprint(&self) -> bool {
        matches!(
            self,
            Action::BlueprintModifyScs
                | Action::BlueprintAddVariable
                | Action::BlueprintAddEvent
                | Action::BlueprintAddFunction
                | Action::BlueprintSetDefault
        )
    }

    /// Derive the coalescing key for a request, or `None` if the action is
    /// never coalesced.
    pub fn coalesce_key(&self, payload: &Value) -> Result<Option<CoalesceKey>, CoalesceError> {
        match self.policy() {
            CoalescePolicy::Asset => {
                let name = string_field(payload, "name").unwrap_or_default();
                let save_path = string_field(payload, "savePath")
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or(self.default_save_path());
                CoalesceKey::for_asset(self.name(), save_path, name).map(Some)
            }
            CoalescePolicy::Script => {
                let script = string_field(payload, "script").unwrap_or_default();
                CoalesceKey::for_script(script).map(Some)
            }
            CoalescePolicy::Query => CoalesceKey::for_query(self.name(), payload).map(Some),
            CoalescePolicy::Never => Ok(None),
        }
    }

    /// Normalized path of the Blueprint a mutating action edits, or `None`
    /// for actions that take no busy mark.
    pub fn busy_key(&self, payload: &Value) -> Result<Option<String>, CoalesceError> {
        if !self.mutates_blueprint() {
            return Ok(None);
        }
        ["blueprintPath", "requestedPath"]
            .iter()
            .filter_map(|field| string_field(payload, field))
            .find(|path| !path.trim().is_empty())
            .map(|path| Some(normalize_content_path(path)))
            .ok_or_else(|| {
                CoalesceError::invalid_key(format!("{} requires a blueprintPath", self.name()))
            })
    }
}

fn string_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(|v| v.as_str())
}

/// Lowercase and drop everything but letters and digits
pub fn normalize_action(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Lookup table from normalized action spellings to [`Action`]
#[derive(Debug, Clone)]
pub struct ActionRouter {
    table: HashMap<String, Action>,
}

impl ActionRouter {
    pub fn new() -> Self {
        let entries: &[(&[&str], Action)] = &[
            (&["blueprint_create", "create_blueprint"][..], Action::BlueprintCreate),
            (&["create_material", "material_create"][..], Action::MaterialCreate),
            (&["create_niagara_system", "niagara_create"][..], Action::NiagaraSystemCreate),
            (&["create_sound_cue", "sound_cue_create"][..], Action::SoundCueCreate),
            (&["create_level_sequence", "sequence_create"][..], Action::LevelSequenceCreate),
            (&["execute_editor_python", "execute_python", "run_python"][..], Action::ExecutePython),
            (&["list_assets"][..], Action::ListAssets),
            (&["get_asset"][..], Action::GetAsset),
            (&["exists_asset", "asset_exists"][..], Action::AssetExists),
            (&["search_assets"][..], Action::SearchAssets),
            (&["find_actors"][..], Action::FindActors),
            (&["spawn_actor"][..], Action::SpawnActor),
            (&["delete_asset"][..], Action::DeleteAsset),
            (&["blueprint_modify_scs", "modify_scs"][..], Action::BlueprintModifyScs),
            (&["blueprint_add_variable", "add_variable"][..], Action::BlueprintAddVariable),
            (&["blueprint_add_event", "add_event"][..], Action::BlueprintAddEvent),
            (&["blueprint_add_function", "add_function"][..], Action::BlueprintAddFunction),
            (&["blueprint_set_default", "set_default"][..], Action::BlueprintSetDefault),
        ];

        let mut table = HashMap::new();
        for (aliases, action) in entries {
            for alias in *aliases {
                table.insert(normalize_action(alias), action.clone());
            }
        }
        Self { table }
    }

    /// Resolve a client-supplied action name
    pub fn resolve(&self, raw: &str) -> Action {
        match self.table.get(&normalize_action(raw)) {
            Some(action) => action.clone(),
            None => Action::Other(raw.trim().to_string()),
        }
    }
}

impl Default for ActionRouter {
    fn default() -> Self {
        Self::new()
    }
}
