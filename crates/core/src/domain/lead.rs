use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::machinery::MachineryType;
use crate::domain::value::{Measure, SlotCandidate, SlotField, SlotStatus, SlotValue};
use crate::slots::{self, SlotId, TechnicalSlot};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    Incomplete,
    Complete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub first_name: SlotValue<String>,
    pub last_name: SlotValue<String>,
    pub phone: SlotValue<String>,
    pub email: SlotValue<String>,
}

/// `usage_type` holds the canonical choice key (`empresa` or `venta`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessInfo {
    pub company_name: SlotValue<String>,
    pub industry: SlotValue<String>,
    pub website: SlotValue<String>,
    pub usage_type: SlotValue<String>,
}

macro_rules! technical_record {
    ($name:ident { $($field:ident: $ty:ty => $slot:ident),+ $(,)? }) => {
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            $(pub $field: SlotValue<$ty>,)+
        }

        impl $name {
            fn field(&self, slot: TechnicalSlot) -> Option<&dyn SlotField> {
                match slot {
                    $(TechnicalSlot::$slot => Some(&self.$field),)+
                    _ => None,
                }
            }

            fn field_mut(&mut self, slot: TechnicalSlot) -> Option<&mut dyn SlotField> {
                match slot {
                    $(TechnicalSlot::$slot => Some(&mut self.$field),)+
                    _ => None,
                }
            }
        }
    };
}

technical_record!(WelderDetails {
    amperage: Measure => Amperage,
    electrode: String => Electrode,
});

technical_record!(CompressorDetails {
    air_volume: Measure => AirVolume,
    connected_tools: String => ConnectedTools,
});

technical_record!(LightTowerDetails {
    led: bool => Led,
});

technical_record!(LiftPlatformDetails {
    working_height: Measure => WorkingHeight,
    activity: String => Activity,
    setting: String => Setting,
});

technical_record!(GeneratorDetails {
    activity: String => Activity,
    capacity_kva: Measure => CapacityKva,
});

technical_record!(BreakerDetails {
    usage: String => Usage,
    power: String => Power,
});

technical_record!(TamperDetails {
    usage: String => Usage,
    engine: String => Engine,
    diaphragm: bool => Diaphragm,
});

technical_record!(ForkliftDetails {
    capacity: Measure => Capacity,
    power: String => Power,
    operator_position: String => OperatorPosition,
    lift_height: Measure => LiftHeight,
});

technical_record!(ManipulatorDetails {
    capacity: Measure => Capacity,
    height: Measure => Height,
    activity: String => Activity,
    power: String => Power,
});

/// Technical requirements; the variant is the machinery type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "machinery_type", rename_all = "snake_case")]
pub enum TechnicalDetails {
    #[default]
    Unset,
    Welder(WelderDetails),
    Compressor(CompressorDetails),
    LightTower(LightTowerDetails),
    LiftPlatform(LiftPlatformDetails),
    Generator(GeneratorDetails),
    Breaker(BreakerDetails),
    Tamper(TamperDetails),
    Forklift(ForkliftDetails),
    Manipulator(ManipulatorDetails),
}

impl TechnicalDetails {
    /// All-unset sub-record for the given branch.
    pub fn empty(machinery: MachineryType) -> Self {
        match machinery {
            MachineryType::Welder => Self::Welder(WelderDetails::default()),
            MachineryType::Compressor => Self::Compressor(CompressorDetails::default()),
            MachineryType::LightTower => Self::LightTower(LightTowerDetails::default()),
            MachineryType::LiftPlatform => Self::LiftPlatform(LiftPlatformDetails::default()),
            MachineryType::Generator => Self::Generator(GeneratorDetails::default()),
            MachineryType::Breaker => Self::Breaker(BreakerDetails::default()),
            MachineryType::Tamper => Self::Tamper(TamperDetails::default()),
            MachineryType::Forklift => Self::Forklift(ForkliftDetails::default()),
            MachineryType::Manipulator => Self::Manipulator(ManipulatorDetails::default()),
        }
    }

    pub fn machinery_type(&self) -> Option<MachineryType> {
        let machinery = match self {
            Self::Unset => return None,
            Self::Welder(_) => MachineryType::Welder,
            Self::Compressor(_) => MachineryType::Compressor,
            Self::LightTower(_) => MachineryType::LightTower,
            Self::LiftPlatform(_) => MachineryType::LiftPlatform,
            Self::Generator(_) => MachineryType::Generator,
            Self::Breaker(_) => MachineryType::Breaker,
            Self::Tamper(_) => MachineryType::Tamper,
            Self::Forklift(_) => MachineryType::Forklift,
            Self::Manipulator(_) => MachineryType::Manipulator,
        };
        Some(machinery)
    }

    pub fn field(&self, slot: TechnicalSlot) -> Option<&dyn SlotField> {
        match self {
            Self::Unset => None,
            Self::Welder(details) => details.field(slot),
            Self::Compressor(details) => details.field(slot),
            Self::LightTower(details) => details.field(slot),
            Self::LiftPlatform(details) => details.field(slot),
            Self::Generator(details) => details.field(slot),
            Self::Breaker(details) => details.field(slot),
            Self::Tamper(details) => details.field(slot),
            Self::Forklift(details) => details.field(slot),
            Self::Manipulator(details) => details.field(slot),
        }
    }

    pub fn field_mut(&mut self, slot: TechnicalSlot) -> Option<&mut dyn SlotField> {
        match self {
            Self::Unset => None,
            Self::Welder(details) => details.field_mut(slot),
            Self::Compressor(details) => details.field_mut(slot),
            Self::LightTower(details) => details.field_mut(slot),
            Self::LiftPlatform(details) => details.field_mut(slot),
            Self::Generator(details) => details.field_mut(slot),
            Self::Breaker(details) => details.field_mut(slot),
            Self::Tamper(details) => details.field_mut(slot),
            Self::Forklift(details) => details.field_mut(slot),
            Self::Manipulator(details) => details.field_mut(slot),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub personal: PersonalInfo,
    pub business: BusinessInfo,
    pub technical: TechnicalDetails,
    pub location: SlotValue<String>,
}

impl Lead {
    pub fn machinery_type(&self) -> Option<MachineryType> {
        self.technical.machinery_type()
    }

    /// Sets the machinery type and opens an all-unset branch. A concrete type
    /// is never replaced; only a reset clears it.
    pub fn select_machinery(&mut self, machinery: MachineryType) -> bool {
        if self.machinery_type().is_some() {
            return false;
        }
        self.technical = TechnicalDetails::empty(machinery);
        true
    }

    pub fn field(&self, slot: SlotId) -> Option<&dyn SlotField> {
        match slot {
            SlotId::FirstName => Some(&self.personal.first_name),
            SlotId::LastName => Some(&self.personal.last_name),
            SlotId::Phone => Some(&self.personal.phone),
            SlotId::Email => Some(&self.personal.email),
            SlotId::CompanyName => Some(&self.business.company_name),
            SlotId::Industry => Some(&self.business.industry),
            SlotId::UsageType => Some(&self.business.usage_type),
            SlotId::Website => Some(&self.business.website),
            SlotId::Technical(technical) => self.technical.field(technical),
            SlotId::Location => Some(&self.location),
            SlotId::MachineryType => None,
        }
    }

    pub fn field_mut(&mut self, slot: SlotId) -> Option<&mut dyn SlotField> {
        match slot {
            SlotId::FirstName => Some(&mut self.personal.first_name),
            SlotId::LastName => Some(&mut self.personal.last_name),
            SlotId::Phone => Some(&mut self.personal.phone),
            SlotId::Email => Some(&mut self.personal.email),
            SlotId::CompanyName => Some(&mut self.business.company_name),
            SlotId::Industry => Some(&mut self.business.industry),
            SlotId::UsageType => Some(&mut self.business.usage_type),
            SlotId::Website => Some(&mut self.business.website),
            SlotId::Technical(technical) => self.technical.field_mut(technical),
            SlotId::Location => Some(&mut self.location),
            SlotId::MachineryType => None,
        }
    }

    /// `None` when the slot does not exist in the lead's current branch.
    pub fn slot_status(&self, slot: SlotId) -> Option<SlotStatus> {
        if slot == SlotId::MachineryType {
            return Some(match self.machinery_type() {
                Some(_) => SlotStatus::Provided,
                None => SlotStatus::Unset,
            });
        }
        self.field(slot).map(SlotField::status)
    }

    pub fn display(&self, slot: SlotId) -> Option<String> {
        if slot == SlotId::MachineryType {
            return self.machinery_type().map(|machinery| machinery.label().to_owned());
        }
        self.field(slot).and_then(SlotField::display)
    }

    pub fn fill(&mut self, slot: SlotId, candidate: SlotCandidate) -> bool {
        self.field_mut(slot).map(|field| field.fill(candidate)).unwrap_or(false)
    }

    pub fn status(&self) -> LeadStatus {
        if slots::is_complete(self) {
            LeadStatus::Complete
        } else {
            LeadStatus::Incomplete
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == LeadStatus::Complete
    }

    /// Flat `slot key -> value` map for CRM export. Unset slots are omitted and
    /// declined slots are exported as `not_provided`.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        slots::canonical_order(self.machinery_type())
            .filter_map(|schema| {
                let value = match self.slot_status(schema.slot)? {
                    SlotStatus::Unset => return None,
                    SlotStatus::NotProvided => "not_provided".to_owned(),
                    SlotStatus::Provided if schema.slot == SlotId::MachineryType => {
                        self.machinery_type()?.key().to_owned()
                    }
                    SlotStatus::Provided => self.display(schema.slot)?,
                };
                Some((schema.slot.key().to_owned(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Lead, LeadStatus, TechnicalDetails};
    use crate::domain::machinery::MachineryType;
    use crate::domain::value::{Measure, SlotCandidate, SlotInput, SlotStatus, Unit};
    use crate::slots::{self, SlotId, TechnicalSlot};

    fn text(value: &str) -> SlotCandidate {
        SlotCandidate::Value(SlotInput::Text(value.to_owned()))
    }

    fn candidate_for(schema: &slots::SlotSchema) -> SlotCandidate {
        use crate::slots::SlotDomain;
        match schema.domain {
            SlotDomain::Text(_) => text("valor"),
            SlotDomain::Choice(options) => text(options[0]),
            SlotDomain::Numeric { unit, min, .. } => {
                SlotCandidate::Value(SlotInput::Measure(Measure::new(Decimal::from(min), unit)))
            }
            SlotDomain::Boolean => SlotCandidate::Value(SlotInput::Flag(true)),
            SlotDomain::Machinery => text("unused"),
        }
    }

    fn profile_filled() -> Lead {
        let mut lead = Lead::default();
        for slot in [
            SlotId::FirstName,
            SlotId::LastName,
            SlotId::Phone,
            SlotId::Email,
            SlotId::CompanyName,
            SlotId::Industry,
            SlotId::UsageType,
            SlotId::Location,
        ] {
            assert!(lead.fill(slot, text("valor")));
        }
        lead
    }

    #[test]
    fn unset_machinery_type_keeps_lead_incomplete() {
        let lead = profile_filled();
        assert_eq!(lead.status(), LeadStatus::Incomplete);
        assert_eq!(slots::missing_required(&lead), vec![SlotId::MachineryType]);
    }

    #[test]
    fn every_branch_completes_exactly_when_required_slots_are_set() {
        for machinery in MachineryType::ALL {
            let mut lead = profile_filled();
            assert!(lead.select_machinery(machinery));
            let schemas = slots::technical_schemas(machinery);

            for (index, schema) in schemas.iter().enumerate() {
                assert!(!lead.is_complete(), "{machinery} complete after {index} technical slots");
                // Declining counts as answered.
                let candidate =
                    if index % 2 == 0 { candidate_for(schema) } else { SlotCandidate::NotProvided };
                assert!(lead.fill(schema.slot, candidate), "{machinery} rejected {}", schema.slot);
            }

            assert!(lead.is_complete(), "{machinery} not complete with all slots set");
        }
    }

    #[test]
    fn website_never_blocks_completion() {
        let mut lead = profile_filled();
        lead.select_machinery(MachineryType::LightTower);
        lead.fill(SlotId::Technical(TechnicalSlot::Led), SlotCandidate::Value(SlotInput::Flag(false)));

        assert!(lead.is_complete());
        assert_eq!(lead.slot_status(SlotId::Website), Some(SlotStatus::Unset));
        assert_eq!(slots::next_unset(&lead), Some(SlotId::Website));
    }

    #[test]
    fn machinery_type_is_not_replaced_once_set() {
        let mut lead = Lead::default();
        assert!(lead.select_machinery(MachineryType::Generator));
        assert!(!lead.select_machinery(MachineryType::Welder));
        assert_eq!(lead.machinery_type(), Some(MachineryType::Generator));
    }

    #[test]
    fn technical_slots_outside_branch_are_absent() {
        let mut lead = Lead::default();
        lead.select_machinery(MachineryType::Generator);
        let amperage = SlotId::Technical(TechnicalSlot::Amperage);
        assert_eq!(lead.slot_status(amperage), None);
        assert!(!lead.fill(amperage, text("200")));
    }

    #[test]
    fn flatten_exports_keys_and_declined_values() {
        let mut lead = Lead::default();
        lead.fill(SlotId::FirstName, text("Juan"));
        lead.fill(SlotId::Email, SlotCandidate::NotProvided);
        lead.select_machinery(MachineryType::Generator);
        lead.fill(
            SlotId::Technical(TechnicalSlot::CapacityKva),
            SlotCandidate::Value(SlotInput::Measure(Measure::new(Decimal::from(50), Unit::Kva))),
        );

        let flat = lead.flatten();
        assert_eq!(flat.get("first_name").map(String::as_str), Some("Juan"));
        assert_eq!(flat.get("email").map(String::as_str), Some("not_provided"));
        assert_eq!(flat.get("machinery_type").map(String::as_str), Some("generator"));
        assert_eq!(flat.get("capacity_kva").map(String::as_str), Some("50 kVA"));
        assert!(!flat.contains_key("last_name"));
    }

    #[test]
    fn lead_round_trips_through_json() {
        let mut lead = Lead::default();
        lead.select_machinery(MachineryType::Forklift);
        lead.fill(SlotId::Technical(TechnicalSlot::Power), text("gas_lp"));
        let json = serde_json::to_string(&lead).expect("serialize");
        let restored: Lead = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, lead);
        assert!(matches!(restored.technical, TechnicalDetails::Forklift(_)));
    }
}
