pub mod domain;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use domain::{SlotDomain, TextFormat};
pub use registry::{
    canonical_order, is_complete, missing_required, next_unset, schema_for, technical_schemas,
    SlotSchema,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TechnicalSlot {
    Amperage,
    Electrode,
    AirVolume,
    ConnectedTools,
    Led,
    WorkingHeight,
    Activity,
    Setting,
    CapacityKva,
    Usage,
    Power,
    Engine,
    Diaphragm,
    Capacity,
    OperatorPosition,
    LiftHeight,
    Height,
}

impl TechnicalSlot {
    const ALL: [TechnicalSlot; 17] = [
        Self::Amperage,
        Self::Electrode,
        Self::AirVolume,
        Self::ConnectedTools,
        Self::Led,
        Self::WorkingHeight,
        Self::Activity,
        Self::Setting,
        Self::CapacityKva,
        Self::Usage,
        Self::Power,
        Self::Engine,
        Self::Diaphragm,
        Self::Capacity,
        Self::OperatorPosition,
        Self::LiftHeight,
        Self::Height,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Amperage => "amperage",
            Self::Electrode => "electrode",
            Self::AirVolume => "air_volume",
            Self::ConnectedTools => "connected_tools",
            Self::Led => "led",
            Self::WorkingHeight => "working_height",
            Self::Activity => "activity",
            Self::Setting => "setting",
            Self::CapacityKva => "capacity_kva",
            Self::Usage => "usage",
            Self::Power => "power",
            Self::Engine => "engine",
            Self::Diaphragm => "diaphragm",
            Self::Capacity => "capacity",
            Self::OperatorPosition => "operator_position",
            Self::LiftHeight => "lift_height",
            Self::Height => "height",
        }
    }
}

/// Identifier of every slot the bot can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SlotId {
    FirstName,
    LastName,
    Phone,
    Email,
    CompanyName,
    Industry,
    UsageType,
    Website,
    MachineryType,
    Technical(TechnicalSlot),
    Location,
}

impl SlotId {
    pub fn key(self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::CompanyName => "company_name",
            Self::Industry => "industry",
            Self::UsageType => "usage_type",
            Self::Website => "website",
            Self::MachineryType => "machinery_type",
            Self::Technical(slot) => slot.key(),
            Self::Location => "location",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        let slot = match key.as_str() {
            "first_name" => Self::FirstName,
            "last_name" => Self::LastName,
            "phone" => Self::Phone,
            "email" => Self::Email,
            "company_name" => Self::CompanyName,
            "industry" => Self::Industry,
            "usage_type" => Self::UsageType,
            "website" => Self::Website,
            "machinery_type" => Self::MachineryType,
            "location" => Self::Location,
            other => {
                return TechnicalSlot::ALL
                    .into_iter()
                    .find(|slot| slot.key() == other)
                    .map(Self::Technical)
            }
        };
        Some(slot)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl From<SlotId> for String {
    fn from(value: SlotId) -> Self {
        value.key().to_owned()
    }
}

impl TryFrom<String> for SlotId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown slot `{value}`"))
    }
}

/// Lowercases, folds Spanish accents and joins words with `_` so free text can
/// be compared against choice keys.
pub fn normalize_token(raw: &str) -> String {
    let mut token = String::with_capacity(raw.len());
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        let folded = match ch {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        };
        if folded.is_alphanumeric() {
            token.push(folded);
        } else if !token.is_empty() && !token.ends_with('_') {
            token.push('_');
        }
    }
    while token.ends_with('_') {
        token.pop();
    }
    token
}
