//! Matcher (§4.1): resolves a recipient name to a folder id over a
//! preloaded, read-only `FolderMap`. Pure and deterministic in stages 1-2;
//! stage 3 makes no ordering guarantee beyond "first substring hit in
//! whatever order the map iterates" (§4.1, §9).

use std::collections::HashMap;

/// Normalized folder-name -> folder-id map. Keys are already
/// lower-cased and trimmed by `FolderMap::load`.
pub struct FolderMap {
    entries: HashMap<String, String>,
}

impl FolderMap {
    pub fn new(raw: HashMap<String, String>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(name, id)| (normalize(&name), id))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn collapse_whitespace(name: &str) -> String {
    normalize(name).split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Matcher<'a> {
    map: &'a FolderMap,
}

impl<'a> Matcher<'a> {
    pub fn new(map: &'a FolderMap) -> Self {
        Self { map }
    }

    /// `findFolderId` (§4.1): three ordered stages, first hit wins.
    pub fn find_folder_id(&self, name: &str) -> Option<String> {
        let exact = normalize(name);
        if let Some(id) = self.map.entries.get(&exact) {
            return Some(id.clone());
        }

        let collapsed = collapse_whitespace(name);
        if collapsed != exact {
            if let Some(id) = self.map.entries.get(&collapsed) {
                return Some(id.clone());
            }
        }

        for (key, id) in &self.map.entries {
            if key.contains(&collapsed) || collapsed.contains(key.as_str()) {
                return Some(id.clone());
            }
        }

        None
    }
}
