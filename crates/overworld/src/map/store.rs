use std::path::{Path, PathBuf};

use tracing::warn;

use super::data::{MapData, MapError};
use crate::tileset::{TileSet, TileSetError};

const MAP_EXTENSION: &str = "json";

/// Resolves map ids to files under the maps directory and tileset ids under
/// the tilesets directory.
#[derive(Debug, Clone)]
pub struct MapStore {
    maps_dir: PathBuf,
    tilesets_dir: PathBuf,
}

impl MapStore {
    pub fn new(maps_dir: &Path, tilesets_dir: &Path) -> Self {
        Self {
            maps_dir: maps_dir.to_path_buf(),
            tilesets_dir: tilesets_dir.to_path_buf(),
        }
    }

    pub fn maps_dir(&self) -> &Path {
        &self.maps_dir
    }

    pub fn tilesets_dir(&self) -> &Path {
        &self.tilesets_dir
    }

    pub fn map_path(&self, map_id: &str) -> PathBuf {
        self.maps_dir.join(format!("{map_id}.{MAP_EXTENSION}"))
    }

    pub fn tileset_path(&self, tileset_id: &str) -> PathBuf {
        self.tilesets_dir.join(format!("{tileset_id}.{MAP_EXTENSION}"))
    }

    /// Accepts either a path to a map file or a bare map id.
    pub fn load(&self, path_or_id: &str) -> Result<MapData, MapError> {
        let candidate = Path::new(path_or_id);
        let looks_like_path = candidate.is_file()
            || candidate
                .extension()
                .is_some_and(|extension| extension == MAP_EXTENSION);
        if looks_like_path {
            if !candidate.is_file() {
                return Err(MapError::NotFound {
                    map_id: path_or_id.to_string(),
                    path: candidate.to_path_buf(),
                });
            }
            return MapData::load(candidate);
        }

        let path = self.map_path(path_or_id);
        if !path.is_file() {
            return Err(MapError::NotFound {
                map_id: path_or_id.to_string(),
                path,
            });
        }
        MapData::load(&path)
    }

    /// With no target, writes the canonical `<maps_dir>/<id>.json`; a directory
    /// target receives `<id>.json`; anything else is used as the file path.
    pub fn save(&self, map: &MapData, target: Option<&Path>) -> Result<PathBuf, MapError> {
        let path = match target {
            None => self.map_path(&map.id),
            Some(dir) if dir.is_dir() => dir.join(format!("{}.{MAP_EXTENSION}", map.id)),
            Some(file) => file.to_path_buf(),
        };
        map.save_to_path(&path)
    }

    /// `Ok(None)` when no tileset file exists for the id.
    pub fn load_tileset(&self, tileset_id: &str) -> Result<Option<TileSet>, TileSetError> {
        let path = self.tileset_path(tileset_id);
        if !path.is_file() {
            warn!(tileset_id, path = %path.display(), "tileset_missing");
            return Ok(None);
        }
        TileSet::load(&path).map(Some)
    }

    /// Loads a map plus its tileset. A broken tileset is logged and dropped;
    /// the map is still usable with every tile treated as walkable.
    pub fn load_bundle(&self, path_or_id: &str) -> Result<(MapData, Option<TileSet>), MapError> {
        let map = self.load(path_or_id)?;
        let tileset = match self.load_tileset(&map.tileset_id) {
            Ok(tileset) => tileset,
            Err(error) => {
                warn!(map_id = %map.id, tileset_id = %map.tileset_id, error = %error, "tileset_load_failed");
                None
            }
        };
        Ok((map, tileset))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::ErrorClass;

    fn store(temp: &TempDir) -> MapStore {
        let maps = temp.path().join("maps");
        let tilesets = temp.path().join("tilesets");
        fs::create_dir_all(&maps).expect("maps dir");
        fs::create_dir_all(&tilesets).expect("tilesets dir");
        MapStore::new(&maps, &tilesets)
    }

    #[test]
    fn save_without_target_uses_canonical_path() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let map = MapData::blank("field", 2, 2, 16, "basic");
        let path = store.save(&map, None).expect("save");
        assert_eq!(path, store.map_path("field"));
        assert_eq!(store.load("field").expect("load by id"), map);
        let by_path = store
            .load(path.to_str().expect("utf-8 path"))
            .expect("load by path");
        assert_eq!(by_path.id, "field");
    }

    #[test]
    fn save_into_directory_appends_id() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        let export = temp.path().join("export");
        fs::create_dir_all(&export).expect("export dir");
        let map = MapData::blank("field", 2, 2, 16, "basic");
        let path = store.save(&map, Some(&export)).expect("save");
        assert_eq!(path, export.join("field.json"));
        assert!(path.is_file());
    }

    #[test]
    fn missing_map_is_not_found() {
        let temp = TempDir::new().expect("tempdir");
        let error = store(&temp).load("nowhere").expect_err("missing");
        assert!(matches!(error, MapError::NotFound { .. }));
        assert_eq!(error.class(), ErrorClass::Io);
    }

    #[test]
    fn bundle_survives_missing_tileset() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        store
            .save(&MapData::blank("field", 2, 2, 16, "absent"), None)
            .expect("save");
        let (map, tileset) = store.load_bundle("field").expect("bundle");
        assert_eq!(map.tileset_id, "absent");
        assert!(tileset.is_none());
    }

    #[test]
    fn bundle_loads_tileset_by_id() {
        let temp = TempDir::new().expect("tempdir");
        let store = store(&temp);
        fs::write(
            store.tileset_path("basic"),
            json!({"id": "basic", "tiles": [{"id": "grass"}]}).to_string(),
        )
        .expect("tileset");
        store
            .save(&MapData::blank("field", 2, 2, 16, "basic"), None)
            .expect("save");
        let (_, tileset) = store.load_bundle("field").expect("bundle");
        assert!(tileset.expect("tileset present").contains_tile("grass"));
    }
}
