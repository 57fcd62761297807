use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::machinery::MachineryType;
use crate::domain::value::{Measure, SlotInput, Unit};
use crate::slots::normalize_token;

const MAX_TEXT_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    Free,
    Phone,
    Email,
    Url,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDomain {
    Text(TextFormat),
    Choice(&'static [&'static str]),
    Numeric { unit: Unit, min: i64, max: i64 },
    Boolean,
    Machinery,
}

impl SlotDomain {
    /// Checks an extracted raw value against the domain and returns its
    /// canonical form, or `None` when the value is out of domain.
    pub fn validate(&self, raw: &Value) -> Option<SlotInput> {
        match self {
            Self::Text(format) => validate_text(*format, raw).map(SlotInput::Text),
            Self::Choice(options) => validate_choice(options, raw).map(SlotInput::Text),
            Self::Numeric { unit, min, max } => {
                validate_numeric(*unit, *min, *max, raw).map(SlotInput::Measure)
            }
            Self::Boolean => validate_flag(raw).map(SlotInput::Flag),
            Self::Machinery => raw
                .as_str()
                .and_then(MachineryType::parse)
                .map(|machinery| SlotInput::Text(machinery.key().to_owned())),
        }
    }

    /// Short human description used when building extraction prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Text(TextFormat::Free) => "free text".to_owned(),
            Self::Text(TextFormat::Phone) => "phone number, 7-15 digits".to_owned(),
            Self::Text(TextFormat::Email) => "e-mail address".to_owned(),
            Self::Text(TextFormat::Url) => "website url or domain".to_owned(),
            Self::Choice(options) => format!("one of: {}", options.join(", ")),
            Self::Numeric { unit, min, max } => {
                format!("number in {} between {min} and {max}", unit.symbol())
            }
            Self::Boolean => "true or false".to_owned(),
            Self::Machinery => {
                let keys: Vec<&str> = MachineryType::ALL.iter().map(|m| m.key()).collect();
                format!("one of: {}", keys.join(", "))
            }
        }
    }
}

fn raw_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn validate_text(format: TextFormat, raw: &Value) -> Option<String> {
    let text = raw_text(raw)?;
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || text.chars().count() > MAX_TEXT_CHARS {
        return None;
    }

    match format {
        TextFormat::Free => Some(text),
        TextFormat::Phone => canonical_phone(&text),
        TextFormat::Email => canonical_email(&text),
        TextFormat::Url => canonical_url(&text),
    }
}

fn canonical_phone(text: &str) -> Option<String> {
    let allowed = |ch: char| ch.is_ascii_digit() || matches!(ch, ' ' | '-' | '(' | ')' | '+' | '.');
    if !text.chars().all(allowed) {
        return None;
    }
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    if text.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}

fn canonical_email(text: &str) -> Option<String> {
    if text.contains(char::is_whitespace) {
        return None;
    }
    let email = text.to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    let (host, tld) = domain.rsplit_once('.')?;
    if host.is_empty() || host.starts_with('.') || tld.len() < 2 {
        return None;
    }
    if !tld.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    Some(email)
}

fn canonical_url(text: &str) -> Option<String> {
    if text.contains(char::is_whitespace) {
        return None;
    }
    let url = text.to_lowercase();
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    let (name, tld) = host.rsplit_once('.')?;
    if name.is_empty() || tld.len() < 2 {
        return None;
    }
    Some(url)
}

fn validate_choice(options: &[&'static str], raw: &Value) -> Option<String> {
    let token = normalize_token(raw.as_str()?);
    if let Some(option) = options.iter().find(|option| **option == token) {
        return Some((*option).to_owned());
    }

    // "para uso de la empresa" style answers: accept when exactly one option
    // appears as a word sequence inside the answer.
    let padded = format!("_{token}_");
    let mut hits = options.iter().filter(|option| padded.contains(&format!("_{option}_")));
    match (hits.next(), hits.next()) {
        (Some(option), None) => Some((*option).to_owned()),
        _ => None,
    }
}

fn validate_numeric(unit: Unit, min: i64, max: i64, raw: &Value) -> Option<Measure> {
    let amount = match raw {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok()?,
        Value::String(text) => parse_quantity(text, unit)?,
        _ => return None,
    };
    if amount < Decimal::from(min) || amount > Decimal::from(max) {
        return None;
    }
    Some(Measure::new(amount, unit))
}

/// Parses "50 kva", "1,5 toneladas" or "200" into an amount expressed in `unit`.
fn parse_quantity(text: &str, unit: Unit) -> Option<Decimal> {
    let text = text.trim();
    let split = text
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == '.' || *ch == ','))
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let (number, alias) = text.split_at(split);
    if number.is_empty() {
        return None;
    }

    let number = match number.split_once(',') {
        Some((_, fraction)) if fraction.len() == 3 && !number.contains('.') => number.replace(',', ""),
        Some(_) => number.replacen(',', ".", 1),
        None => number.to_owned(),
    };
    let amount = Decimal::from_str(&number).ok()?;
    let factor = unit.conversion_factor(alias)?;
    amount.checked_mul(factor)
}

fn validate_flag(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match normalize_token(text).as_str() {
            "si" | "yes" | "true" | "con_led" | "led" | "claro" | "correcto" => Some(true),
            "no" | "false" | "sin_led" | "ninguno" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{SlotDomain, TextFormat};
    use crate::domain::value::{Measure, SlotInput, Unit};

    fn text(value: &str) -> Option<SlotInput> {
        Some(SlotInput::Text(value.to_owned()))
    }

    #[test]
    fn phone_accepts_separators_and_rejects_short_or_alpha_values() {
        let phone = SlotDomain::Text(TextFormat::Phone);
        assert_eq!(phone.validate(&json!("33 1234 5678")), text("3312345678"));
        assert_eq!(phone.validate(&json!("+52 (33) 1234-5678")), text("+523312345678"));
        assert_eq!(phone.validate(&json!(3312345678_u64)), text("3312345678"));
        assert_eq!(phone.validate(&json!("12345")), None);
        assert_eq!(phone.validate(&json!("llámame")), None);
    }

    #[test]
    fn email_requires_local_domain_and_tld() {
        let email = SlotDomain::Text(TextFormat::Email);
        assert_eq!(email.validate(&json!("Juan@Acme.MX")), text("juan@acme.mx"));
        assert_eq!(email.validate(&json!("juan@acme")), None);
        assert_eq!(email.validate(&json!("no tengo")), None);
        assert_eq!(email.validate(&json!("@acme.com")), None);
    }

    #[test]
    fn website_accepts_bare_domains() {
        let website = SlotDomain::Text(TextFormat::Url);
        assert_eq!(website.validate(&json!("acme.com.mx")), text("acme.com.mx"));
        assert_eq!(website.validate(&json!("https://Acme.com/contacto")), text("https://acme.com/contacto"));
        assert_eq!(website.validate(&json!("no tenemos")), None);
    }

    #[test]
    fn choice_matches_normalized_answers() {
        let power = SlotDomain::Choice(&["electrico", "gasolina", "gas_lp"]);
        assert_eq!(power.validate(&json!("Eléctrico")), text("electrico"));
        assert_eq!(power.validate(&json!("a gas LP")), text("gas_lp"));
        assert_eq!(power.validate(&json!("diesel")), None);

        let usage = SlotDomain::Choice(&["empresa", "venta"]);
        assert_eq!(usage.validate(&json!("para uso de la empresa")), text("empresa"));
    }

    #[test]
    fn numeric_values_convert_units_and_enforce_range() {
        let capacity = SlotDomain::Numeric { unit: Unit::Kilograms, min: 100, max: 50_000 };
        assert_eq!(
            capacity.validate(&json!("2.5 toneladas")),
            Some(SlotInput::Measure(Measure::new(Decimal::from(2500), Unit::Kilograms)))
        );
        assert_eq!(
            capacity.validate(&json!("1,5 ton")),
            Some(SlotInput::Measure(Measure::new(Decimal::from(1500), Unit::Kilograms)))
        );
        assert_eq!(
            capacity.validate(&json!("10,000 kg")),
            Some(SlotInput::Measure(Measure::new(Decimal::from(10_000), Unit::Kilograms)))
        );
        assert_eq!(capacity.validate(&json!(60)), None);
        assert_eq!(capacity.validate(&json!("mucha")), None);
        assert_eq!(capacity.validate(&json!("3 litros")), None);

        let kva = SlotDomain::Numeric { unit: Unit::Kva, min: 1, max: 3000 };
        assert_eq!(
            kva.validate(&json!("40 kW")),
            Some(SlotInput::Measure(Measure::new(Decimal::from(50), Unit::Kva)))
        );
    }

    #[test]
    fn numeric_values_that_overflow_on_conversion_are_out_of_domain() {
        let capacity = SlotDomain::Numeric { unit: Unit::Kilograms, min: 100, max: 50_000 };
        assert_eq!(capacity.validate(&json!("79228162514264337593543950335 toneladas")), None);
        assert_eq!(capacity.validate(&json!("999999999999999999999999999999 kg")), None);
        assert_eq!(capacity.validate(&json!(1e40)), None);

        let kva = SlotDomain::Numeric { unit: Unit::Kva, min: 1, max: 3000 };
        assert_eq!(kva.validate(&json!("79228162514264337593543950335 kW")), None);
    }

    #[test]
    fn boolean_accepts_spanish_answers() {
        assert_eq!(SlotDomain::Boolean.validate(&json!("Sí")), Some(SlotInput::Flag(true)));
        assert_eq!(SlotDomain::Boolean.validate(&json!(false)), Some(SlotInput::Flag(false)));
        assert_eq!(SlotDomain::Boolean.validate(&json!("quizá")), None);
    }

    #[test]
    fn machinery_resolves_aliases_to_keys() {
        assert_eq!(SlotDomain::Machinery.validate(&json!("Montacargas")), text("forklift"));
        assert_eq!(SlotDomain::Machinery.validate(&json!("grúa torre")), None);
    }
}
