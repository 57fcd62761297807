use crate::domain::lead::Lead;
use crate::domain::machinery::MachineryType;
use crate::domain::value::{SlotStatus, Unit};
use crate::slots::domain::{SlotDomain, TextFormat};
use crate::slots::{SlotId, TechnicalSlot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSchema {
    pub slot: SlotId,
    pub domain: SlotDomain,
    pub required: bool,
    pub prompt: &'static str,
    pub reason: &'static str,
}

const fn required(
    slot: SlotId,
    domain: SlotDomain,
    prompt: &'static str,
    reason: &'static str,
) -> SlotSchema {
    SlotSchema { slot, domain, required: true, prompt, reason }
}

const fn technical(
    slot: TechnicalSlot,
    domain: SlotDomain,
    prompt: &'static str,
    reason: &'static str,
) -> SlotSchema {
    required(SlotId::Technical(slot), domain, prompt, reason)
}

static PROFILE: [SlotSchema; 9] = [
    required(
        SlotId::FirstName,
        SlotDomain::Text(TextFormat::Free),
        "¿Cuál es tu nombre?",
        "para dirigirnos a ti correctamente",
    ),
    required(
        SlotId::LastName,
        SlotDomain::Text(TextFormat::Free),
        "¿Cuál es tu apellido?",
        "para registrar tu solicitud",
    ),
    required(
        SlotId::Phone,
        SlotDomain::Text(TextFormat::Phone),
        "¿A qué número de teléfono te podemos contactar?",
        "para que un asesor pueda llamarte",
    ),
    required(
        SlotId::Email,
        SlotDomain::Text(TextFormat::Email),
        "¿Cuál es tu correo electrónico?",
        "para enviarte la cotización",
    ),
    required(
        SlotId::CompanyName,
        SlotDomain::Text(TextFormat::Free),
        "¿Cómo se llama tu empresa?",
        "para preparar la cotización a nombre correcto",
    ),
    required(
        SlotId::Industry,
        SlotDomain::Text(TextFormat::Free),
        "¿A qué giro o industria se dedica tu empresa?",
        "para recomendarte el equipo adecuado",
    ),
    required(
        SlotId::UsageType,
        SlotDomain::Choice(&["empresa", "venta"]),
        "¿El equipo es para uso de tu empresa o para venta?",
        "para ofrecerte las condiciones correctas",
    ),
    SlotSchema {
        slot: SlotId::Website,
        domain: SlotDomain::Text(TextFormat::Url),
        required: false,
        prompt: "¿Tu empresa tiene página web?",
        reason: "para conocer mejor tu negocio",
    },
    required(
        SlotId::MachineryType,
        SlotDomain::Machinery,
        "¿Qué tipo de maquinaria necesitas? (soldadora, compresor, torre de iluminación, plataforma, generador, rompedor, apisonador, montacargas o manipulador)",
        "para saber qué equipo cotizar",
    ),
];

static LOCATION: SlotSchema = required(
    SlotId::Location,
    SlotDomain::Text(TextFormat::Free),
    "¿En qué ciudad o zona necesitas el equipo?",
    "para revisar disponibilidad y entrega",
);

static WELDER: [SlotSchema; 2] = [
    technical(
        TechnicalSlot::Amperage,
        SlotDomain::Numeric { unit: Unit::Amperes, min: 30, max: 1000 },
        "¿Qué amperaje necesitas en la soldadora?",
        "para elegir el modelo con la potencia correcta",
    ),
    technical(
        TechnicalSlot::Electrode,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué tipo de electrodo vas a utilizar?",
        "para confirmar compatibilidad",
    ),
];

static COMPRESSOR: [SlotSchema; 2] = [
    technical(
        TechnicalSlot::AirVolume,
        SlotDomain::Numeric { unit: Unit::Liters, min: 1, max: 10_000 },
        "¿Qué volumen de aire necesitas (en litros)?",
        "para dimensionar el compresor",
    ),
    technical(
        TechnicalSlot::ConnectedTools,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué herramientas vas a conectar al compresor?",
        "para calcular el consumo de aire",
    ),
];

static LIGHT_TOWER: [SlotSchema; 1] = [technical(
    TechnicalSlot::Led,
    SlotDomain::Boolean,
    "¿Buscas una torre de iluminación con luces LED?",
    "para elegir el tipo de lámpara",
)];

static LIFT_PLATFORM: [SlotSchema; 3] = [
    technical(
        TechnicalSlot::WorkingHeight,
        SlotDomain::Numeric { unit: Unit::Meters, min: 1, max: 60 },
        "¿A qué altura necesitas trabajar (en metros)?",
        "para elegir el alcance de la plataforma",
    ),
    technical(
        TechnicalSlot::Activity,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué actividad vas a realizar con la plataforma?",
        "para recomendar el tipo de plataforma",
    ),
    technical(
        TechnicalSlot::Setting,
        SlotDomain::Choice(&["interior", "exterior"]),
        "¿La vas a usar en interior o exterior?",
        "para elegir la tracción y el motor",
    ),
];

static GENERATOR: [SlotSchema; 2] = [
    technical(
        TechnicalSlot::Activity,
        SlotDomain::Text(TextFormat::Free),
        "¿Para qué actividad necesitas el generador?",
        "para estimar la carga",
    ),
    technical(
        TechnicalSlot::CapacityKva,
        SlotDomain::Numeric { unit: Unit::Kva, min: 1, max: 3000 },
        "¿Qué capacidad necesitas en kVA?",
        "para elegir el generador adecuado",
    ),
];

static BREAKER: [SlotSchema; 2] = [
    technical(
        TechnicalSlot::Usage,
        SlotDomain::Text(TextFormat::Free),
        "¿Para qué vas a usar el rompedor?",
        "para elegir el peso del martillo",
    ),
    technical(
        TechnicalSlot::Power,
        SlotDomain::Choice(&["electrico", "neumatico"]),
        "¿Lo prefieres eléctrico o neumático?",
        "para confirmar la fuente de energía",
    ),
];

static TAMPER: [SlotSchema; 3] = [
    technical(
        TechnicalSlot::Usage,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué vas a compactar con el apisonador?",
        "para elegir la fuerza de impacto",
    ),
    technical(
        TechnicalSlot::Engine,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué tipo de motor prefieres?",
        "para confirmar disponibilidad",
    ),
    technical(
        TechnicalSlot::Diaphragm,
        SlotDomain::Boolean,
        "¿Necesitas que tenga diafragma?",
        "para elegir el modelo",
    ),
];

static FORKLIFT: [SlotSchema; 4] = [
    technical(
        TechnicalSlot::Capacity,
        SlotDomain::Numeric { unit: Unit::Kilograms, min: 100, max: 50_000 },
        "¿Qué capacidad de carga necesitas (en kg)?",
        "para elegir el montacargas",
    ),
    technical(
        TechnicalSlot::Power,
        SlotDomain::Choice(&["electrico", "gasolina", "gas_lp"]),
        "¿Lo prefieres eléctrico, a gasolina o a gas LP?",
        "para confirmar la fuente de energía",
    ),
    technical(
        TechnicalSlot::OperatorPosition,
        SlotDomain::Choice(&["parado", "sentado"]),
        "¿El operador va parado o sentado?",
        "para elegir la configuración de cabina",
    ),
    technical(
        TechnicalSlot::LiftHeight,
        SlotDomain::Numeric { unit: Unit::Meters, min: 1, max: 20 },
        "¿A qué altura necesitas levantar la carga (en metros)?",
        "para elegir el mástil",
    ),
];

static MANIPULATOR: [SlotSchema; 4] = [
    technical(
        TechnicalSlot::Capacity,
        SlotDomain::Numeric { unit: Unit::Kilograms, min: 100, max: 50_000 },
        "¿Qué capacidad de carga necesitas (en kg)?",
        "para elegir el manipulador",
    ),
    technical(
        TechnicalSlot::Height,
        SlotDomain::Numeric { unit: Unit::Meters, min: 1, max: 40 },
        "¿A qué altura necesitas trabajar (en metros)?",
        "para elegir el alcance de la pluma",
    ),
    technical(
        TechnicalSlot::Activity,
        SlotDomain::Text(TextFormat::Free),
        "¿Qué actividad vas a realizar con el manipulador?",
        "para recomendar los accesorios",
    ),
    technical(
        TechnicalSlot::Power,
        SlotDomain::Choice(&["electrico", "combustion"]),
        "¿Lo prefieres eléctrico o de combustión?",
        "para confirmar la fuente de energía",
    ),
];

/// Technical slots of a branch, in canonical order.
pub fn technical_schemas(machinery: MachineryType) -> &'static [SlotSchema] {
    match machinery {
        MachineryType::Welder => &WELDER,
        MachineryType::Compressor => &COMPRESSOR,
        MachineryType::LightTower => &LIGHT_TOWER,
        MachineryType::LiftPlatform => &LIFT_PLATFORM,
        MachineryType::Generator => &GENERATOR,
        MachineryType::Breaker => &BREAKER,
        MachineryType::Tamper => &TAMPER,
        MachineryType::Forklift => &FORKLIFT,
        MachineryType::Manipulator => &MANIPULATOR,
    }
}

/// Every slot of the branch selected by `machinery`, in the order the bot asks
/// for them. Without a machinery type the technical block is empty.
pub fn canonical_order(
    machinery: Option<MachineryType>,
) -> impl Iterator<Item = &'static SlotSchema> {
    let technical: &'static [SlotSchema] = machinery.map(technical_schemas).unwrap_or(&[]);
    PROFILE.iter().chain(technical.iter()).chain(std::iter::once(&LOCATION))
}

pub fn schema_for(slot: SlotId, machinery: Option<MachineryType>) -> Option<&'static SlotSchema> {
    canonical_order(machinery).find(|schema| schema.slot == slot)
}

pub fn missing_required(lead: &Lead) -> Vec<SlotId> {
    canonical_order(lead.machinery_type())
        .filter(|schema| schema.required)
        .filter(|schema| lead.slot_status(schema.slot) == Some(SlotStatus::Unset))
        .map(|schema| schema.slot)
        .collect()
}

pub fn is_complete(lead: &Lead) -> bool {
    missing_required(lead).is_empty()
}

/// First unset slot in canonical order, optional slots included.
pub fn next_unset(lead: &Lead) -> Option<SlotId> {
    canonical_order(lead.machinery_type())
        .find(|schema| lead.slot_status(schema.slot) == Some(SlotStatus::Unset))
        .map(|schema| schema.slot)
}
