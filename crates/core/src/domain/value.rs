use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// State of a single lead slot. `Unset` means the bot has not learned anything
/// yet; `NotProvided` means the user explicitly declined to answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum SlotValue<T> {
    Unset,
    NotProvided,
    Provided(T),
}

impl<T> Default for SlotValue<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T> SlotValue<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn provided(&self) -> Option<&T> {
        match self {
            Self::Provided(value) => Some(value),
            Self::Unset | Self::NotProvided => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Unset,
    NotProvided,
    Provided,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Amperes,
    Liters,
    Meters,
    Kva,
    Kilograms,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Amperes => "A",
            Self::Liters => "L",
            Self::Meters => "m",
            Self::Kva => "kVA",
            Self::Kilograms => "kg",
        }
    }

    /// Multiplier that converts a value written with `alias` into this unit.
    /// An empty alias means the user wrote a bare number.
    pub fn conversion_factor(self, alias: &str) -> Option<Decimal> {
        let alias = alias.trim().trim_end_matches('.').to_lowercase();
        if alias.is_empty() {
            return Some(Decimal::ONE);
        }
        let alias = alias.as_str();
        match self {
            Self::Amperes => {
                matches!(alias, "a" | "amp" | "amps" | "amperes" | "amperios" | "amperaje")
                    .then_some(Decimal::ONE)
            }
            Self::Liters => matches!(
                alias,
                "l" | "lt" | "lts" | "litro" | "litros" | "liter" | "liters" | "l/min" | "lpm"
            )
            .then_some(Decimal::ONE),
            Self::Meters => match alias {
                "m" | "mt" | "mts" | "metro" | "metros" | "meter" | "meters" => Some(Decimal::ONE),
                "cm" | "centimetros" | "centímetros" => Some(Decimal::new(1, 2)),
                _ => None,
            },
            Self::Kva => match alias {
                "kva" | "kvas" | "kv" => Some(Decimal::ONE),
                "kw" | "kilowatts" => Some(Decimal::new(125, 2)),
                _ => None,
            },
            Self::Kilograms => match alias {
                "kg" | "kgs" | "kilo" | "kilos" | "kilogramos" => Some(Decimal::ONE),
                "t" | "ton" | "tons" | "tonelada" | "toneladas" => Some(Decimal::from(1000)),
                _ => None,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub amount: Decimal,
    pub unit: Unit,
}

impl Measure {
    pub fn new(amount: Decimal, unit: Unit) -> Self {
        Self { amount: amount.normalize(), unit }
    }
}

impl std::fmt::Display for Measure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.symbol())
    }
}

/// A value that already passed its slot domain check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotInput {
    Text(String),
    Measure(Measure),
    Flag(bool),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotCandidate {
    NotProvided,
    Value(SlotInput),
}

pub trait SlotType: Sized {
    fn from_input(input: SlotInput) -> Option<Self>;
    fn display(&self) -> String;
}

impl SlotType for String {
    fn from_input(input: SlotInput) -> Option<Self> {
        match input {
            SlotInput::Text(text) => Some(text),
            SlotInput::Measure(_) | SlotInput::Flag(_) => None,
        }
    }

    fn display(&self) -> String {
        self.clone()
    }
}

impl SlotType for Measure {
    fn from_input(input: SlotInput) -> Option<Self> {
        match input {
            SlotInput::Measure(measure) => Some(measure),
            SlotInput::Text(_) | SlotInput::Flag(_) => None,
        }
    }

    fn display(&self) -> String {
        self.to_string()
    }
}

impl SlotType for bool {
    fn from_input(input: SlotInput) -> Option<Self> {
        match input {
            SlotInput::Flag(flag) => Some(flag),
            SlotInput::Text(_) | SlotInput::Measure(_) => None,
        }
    }

    fn display(&self) -> String {
        let text = if *self { "sí" } else { "no" };
        text.to_owned()
    }
}

/// Uniform view over typed slot values so the registry can address them by id.
pub trait SlotField {
    fn status(&self) -> SlotStatus;
    fn display(&self) -> Option<String>;
    /// Applies the candidate only when the slot is still unset.
    fn fill(&mut self, candidate: SlotCandidate) -> bool;
}

impl<T> SlotField for SlotValue<T>
where
    T: SlotType,
{
    fn status(&self) -> SlotStatus {
        match self {
            Self::Unset => SlotStatus::Unset,
            Self::NotProvided => SlotStatus::NotProvided,
            Self::Provided(_) => SlotStatus::Provided,
        }
    }

    fn display(&self) -> Option<String> {
        self.provided().map(SlotType::display)
    }

    fn fill(&mut self, candidate: SlotCandidate) -> bool {
        if !self.is_unset() {
            return false;
        }
        match candidate {
            SlotCandidate::NotProvided => {
                *self = Self::NotProvided;
                true
            }
            SlotCandidate::Value(input) => match T::from_input(input) {
                Some(value) => {
                    *self = Self::Provided(value);
                    true
                }
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Measure, SlotCandidate, SlotField, SlotInput, SlotStatus, SlotValue, Unit};

    #[test]
    fn fill_only_touches_unset_slots() {
        let mut slot: SlotValue<String> = SlotValue::default();
        assert!(slot.fill(SlotCandidate::Value(SlotInput::Text("Juan".to_owned()))));
        assert!(!slot.fill(SlotCandidate::Value(SlotInput::Text("Pedro".to_owned()))));
        assert!(!slot.fill(SlotCandidate::NotProvided));
        assert_eq!(slot, SlotValue::Provided("Juan".to_owned()));
    }

    #[test]
    fn not_provided_is_distinct_from_unset_and_sticky() {
        let mut slot: SlotValue<String> = SlotValue::Unset;
        assert!(slot.fill(SlotCandidate::NotProvided));
        assert_eq!(slot.status(), SlotStatus::NotProvided);
        assert!(!slot.fill(SlotCandidate::Value(SlotInput::Text("a@b.mx".to_owned()))));
        assert_eq!(slot.display(), None);
    }

    #[test]
    fn mismatched_input_kind_is_ignored() {
        let mut slot: SlotValue<Measure> = SlotValue::Unset;
        assert!(!slot.fill(SlotCandidate::Value(SlotInput::Flag(true))));
        assert!(slot.is_unset());
    }

    #[test]
    fn unit_aliases_convert_exactly() {
        assert_eq!(Unit::Kilograms.conversion_factor("toneladas"), Some(Decimal::from(1000)));
        assert_eq!(Unit::Meters.conversion_factor("cm"), Some(Decimal::new(1, 2)));
        assert_eq!(Unit::Kva.conversion_factor("kW"), Some(Decimal::new(125, 2)));
        assert_eq!(Unit::Amperes.conversion_factor(""), Some(Decimal::ONE));
        assert_eq!(Unit::Liters.conversion_factor("kg"), None);
    }

    #[test]
    fn slot_value_serializes_with_explicit_state() {
        let json = serde_json::to_value(SlotValue::Provided(Measure::new(
            Decimal::new(2500, 2),
            Unit::Kva,
        )))
        .expect("serialize");
        assert_eq!(json["state"], "provided");
        assert_eq!(json["value"]["unit"], "kva");

        let declined = serde_json::to_value(SlotValue::<String>::NotProvided).expect("serialize");
        assert_eq!(declined["state"], "not_provided");
    }
}
