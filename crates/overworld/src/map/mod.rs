//! Map records, the `MapData` container, validation and file storage.

pub mod actions;
mod data;
mod records;
mod store;
mod validate;

pub use actions::Action;
pub use data::{MapData, MapError, MapLayer, DEFAULT_MAP_VERSION};
pub use records::{
    condition_met, CellOverride, Condition, Connection, ConnectionKind, ConnectionSource,
    ConnectionTarget, DialogText, Direction, EntityDef, ExplicitKeys, ExtraFields, GridPos,
    TileBehavior, TriggerArea, TriggerDef, TriggerKind, AUTO_PROVENANCE_KEY, AUTO_PROVENANCE_TAG,
    GROUND_LAYER, MANUAL_PROVENANCE_KEY, OVERLAY_LAYER, SOURCE_EDGE_COORD_KEY, SPAWN_FLAG,
};
pub use store::MapStore;
pub use validate::{KnownMaps, ValidationReport};
