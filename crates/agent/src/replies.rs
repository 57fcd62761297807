//! User-facing reply texts. Everything the bot says in bot mode is built here.

use std::fmt::Write as _;

use leadbot_core::domain::lead::Lead;
use leadbot_core::domain::value::SlotStatus;
use leadbot_core::slots::{self, SlotId};

pub const GREETING: &str = "¡Hola! Soy Juan, tu asistente especializado en maquinaria ligera.";
pub const SAFE_REFUSAL: &str = "No me queda claro lo que dices. ¿Podrías explicarme mejor?";
pub const RESET_CONFIRMATION: &str = "Conversación reiniciada. Puedes comenzar de nuevo.";
pub const HANDOFF_ACK: &str =
    "Te comunico con un asesor. En breve una persona de nuestro equipo te atenderá por este medio.";
pub const TECHNICAL_ERROR: &str =
    "Disculpa, hubo un problema técnico. ¿Podrías repetir tu mensaje?";
pub const TEXT_ONLY: &str = "¡Hola! Solo puedo procesar mensajes de texto. Por favor, envíame \
                             un mensaje de texto y te responderé con información sobre maquinaria.";
pub const ALREADY_COMPLETE: &str = "Ya tenemos todos tus datos y un asesor se pondrá en contacto \
                                    contigo pronto. Si quieres corregir algo, solo dímelo.";

fn slot_label(slot: SlotId) -> String {
    let label = match slot {
        SlotId::FirstName => "Nombre",
        SlotId::LastName => "Apellido",
        SlotId::Phone => "Teléfono",
        SlotId::Email => "Correo",
        SlotId::CompanyName => "Empresa",
        SlotId::Industry => "Giro",
        SlotId::UsageType => "Uso",
        SlotId::Website => "Sitio web",
        SlotId::MachineryType => "Maquinaria",
        SlotId::Location => "Lugar de requerimiento",
        SlotId::Technical(technical) => return technical.key().replace('_', " "),
    };
    label.to_string()
}

/// Question for `slot` with the reason the bot needs it.
pub fn question(slot: SlotId, lead: &Lead) -> String {
    match slots::schema_for(slot, lead.machinery_type()) {
        Some(schema) => format!("{} Lo necesito {}.", schema.prompt, schema.reason),
        None => format!("¿Me compartes tu {}?", slot_label(slot).to_lowercase()),
    }
}

/// Short acknowledgement of what the last message filled, if anything.
pub fn acknowledgement(applied: &[SlotId], lead: &Lead) -> Option<String> {
    if applied.contains(&SlotId::MachineryType) {
        let machinery = lead.machinery_type()?;
        return Some(format!("Perfecto, veo que necesitas {}.", machinery.label()));
    }
    if applied.contains(&SlotId::FirstName) {
        let name = lead.display(SlotId::FirstName)?;
        return Some(format!("¡Mucho gusto, {name}!"));
    }
    (!applied.is_empty()).then(|| "¡Gracias!".to_string())
}

/// Summary sent when the lead becomes complete.
pub fn completion_summary(lead: &Lead) -> String {
    let mut summary = match lead.display(SlotId::FirstName) {
        Some(name) => format!("¡Perfecto, {name}! He registrado toda tu información:"),
        None => "¡Perfecto! He registrado toda tu información:".to_string(),
    };
    for schema in slots::canonical_order(lead.machinery_type()) {
        if let Some(value) = lead.display(schema.slot) {
            let _ = write!(summary, "\n- {}: {value}", slot_label(schema.slot));
        }
    }
    summary.push_str(
        "\n\nUn asesor preparará tu cotización y se pondrá en contacto contigo pronto.",
    );
    summary
}

pub fn correction_ack() -> &'static str {
    "Listo, actualicé tu información y se la compartí a tu asesor."
}

/// Filled and pending slots, without touching the lead.
pub fn status_snapshot(lead: &Lead) -> String {
    let mut snapshot = String::from("Estado de tu solicitud:");
    for schema in slots::canonical_order(lead.machinery_type()) {
        let value = match lead.slot_status(schema.slot) {
            Some(SlotStatus::Provided) => lead.display(schema.slot).unwrap_or_default(),
            Some(SlotStatus::NotProvided) => "no proporcionado".to_string(),
            Some(SlotStatus::Unset) | None => "pendiente".to_string(),
        };
        let _ = write!(snapshot, "\n- {}: {value}", slot_label(schema.slot));
    }
    let completed = if lead.is_complete() { "Sí" } else { "No" };
    let _ = write!(snapshot, "\nCompleta: {completed}");
    snapshot
}

/// Re-ask used when extraction keeps failing.
pub fn fallback(pending: Option<SlotId>, lead: &Lead) -> String {
    match pending {
        Some(slot) => format!("{TECHNICAL_ERROR}\n{}", question(slot, lead)),
        None => TECHNICAL_ERROR.to_string(),
    }
}

/// Joins non-empty reply parts with a blank line.
pub fn compose<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts.into_iter().filter(|part| !part.trim().is_empty()).collect::<Vec<_>>().join("\n\n")
}
