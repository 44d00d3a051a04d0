//! Scripted action records attached to entities and triggers.
//!
//! Every record is a JSON object with a `kind` string. Kinds this crate does
//! not understand, and known kinds whose payload does not decode, become
//! [`Action::Unknown`] holding the raw object so they survive a save and are
//! skipped by the interpreter.

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::records::{DialogText, ExtraFields, GridPos};

const KIND_KEY: &str = "kind";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ShowText(ShowText),
    SetFlag(FlagChange),
    ClearFlag(FlagChange),
    PlaySound(PlaySound),
    PlayMusic(PlayMusic),
    StopMusic(StopMusic),
    Warp(Warp),
    RunConnection(RunConnection),
    SetEntity(SetEntity),
    SetOverride(SetOverride),
    StartBattle(StartBattle),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowText {
    pub text: DialogText,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagChange {
    pub flag: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySound {
    pub sound_id: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayMusic {
    pub music_id: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopMusic {
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warp {
    pub map_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn: Option<GridPos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConnection {
    pub connection_id: String,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Sets `hidden`/`collision` when given; with neither given, flips `hidden`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEntity {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOverride {
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walkable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_walkable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_flags: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBattle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Action {
    pub fn show_text(text: &str) -> Self {
        Self::ShowText(ShowText {
            text: DialogText::Line(text.to_string()),
            extra: ExtraFields::new(),
        })
    }

    pub fn from_value(raw: Value) -> Self {
        let Some(kind) = raw.get(KIND_KEY).and_then(Value::as_str) else {
            return Self::Unknown(raw);
        };
        let decoded = match kind {
            "showText" => decode(&raw).map(Self::ShowText),
            "setFlag" => decode(&raw).map(Self::SetFlag),
            "clearFlag" => decode(&raw).map(Self::ClearFlag),
            "playSound" => decode(&raw).map(Self::PlaySound),
            "playMusic" => decode(&raw).map(Self::PlayMusic),
            "stopMusic" => decode(&raw).map(Self::StopMusic),
            "warp" => decode(&raw).map(Self::Warp),
            "runConnection" => decode(&raw).map(Self::RunConnection),
            "setEntity" => decode(&raw).map(Self::SetEntity),
            "setOverride" => decode(&raw).map(Self::SetOverride),
            "startBattle" => decode(&raw).map(Self::StartBattle),
            _ => None,
        };
        decoded.unwrap_or(Self::Unknown(raw))
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ShowText(_) => "showText",
            Self::SetFlag(_) => "setFlag",
            Self::ClearFlag(_) => "clearFlag",
            Self::PlaySound(_) => "playSound",
            Self::PlayMusic(_) => "playMusic",
            Self::StopMusic(_) => "stopMusic",
            Self::Warp(_) => "warp",
            Self::RunConnection(_) => "runConnection",
            Self::SetEntity(_) => "setEntity",
            Self::SetOverride(_) => "setOverride",
            Self::StartBattle(_) => "startBattle",
            Self::Unknown(raw) => raw.get(KIND_KEY).and_then(Value::as_str).unwrap_or(""),
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ShowText(body) => tagged(self.kind(), body),
            Self::SetFlag(body) | Self::ClearFlag(body) => tagged(self.kind(), body),
            Self::PlaySound(body) => tagged(self.kind(), body),
            Self::PlayMusic(body) => tagged(self.kind(), body),
            Self::StopMusic(body) => tagged(self.kind(), body),
            Self::Warp(body) => tagged(self.kind(), body),
            Self::RunConnection(body) => tagged(self.kind(), body),
            Self::SetEntity(body) => tagged(self.kind(), body),
            Self::SetOverride(body) => tagged(self.kind(), body),
            Self::StartBattle(body) => tagged(self.kind(), body),
            Self::Unknown(raw) => Ok(raw.clone()),
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    let mut body = raw.as_object()?.clone();
    body.remove(KIND_KEY);
    serde_json::from_value(Value::Object(body)).ok()
}

fn tagged<T: Serialize>(kind: &str, body: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(fields) = &mut value {
        fields.insert(KIND_KEY.to_string(), Value::String(kind.to_string()));
    }
    Ok(value)
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}
