use serde::{Deserialize, Serialize};

use crate::slots::normalize_token;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineryType {
    Welder,
    Compressor,
    LightTower,
    LiftPlatform,
    Generator,
    Breaker,
    Tamper,
    Forklift,
    Manipulator,
}

impl MachineryType {
    pub const ALL: [MachineryType; 9] = [
        MachineryType::Welder,
        MachineryType::Compressor,
        MachineryType::LightTower,
        MachineryType::LiftPlatform,
        MachineryType::Generator,
        MachineryType::Breaker,
        MachineryType::Tamper,
        MachineryType::Forklift,
        MachineryType::Manipulator,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Welder => "welder",
            Self::Compressor => "compressor",
            Self::LightTower => "light_tower",
            Self::LiftPlatform => "lift_platform",
            Self::Generator => "generator",
            Self::Breaker => "breaker",
            Self::Tamper => "tamper",
            Self::Forklift => "forklift",
            Self::Manipulator => "manipulator",
        }
    }

    /// Label used in customer-facing replies and CRM product fields.
    pub fn label(self) -> &'static str {
        match self {
            Self::Welder => "soldadora",
            Self::Compressor => "compresor",
            Self::LightTower => "torre de iluminación",
            Self::LiftPlatform => "plataforma de elevación",
            Self::Generator => "generador",
            Self::Breaker => "rompedor",
            Self::Tamper => "apisonador",
            Self::Forklift => "montacargas",
            Self::Manipulator => "manipulador telescópico",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Welder => &["welder", "soldadora", "soldadoras", "maquina_de_soldar"],
            Self::Compressor => &["compressor", "compresor", "compresora", "compresores"],
            Self::LightTower => &[
                "light_tower",
                "torre_iluminacion",
                "torre_de_iluminacion",
                "torre_de_luz",
                "torres_de_iluminacion",
                "lampara",
            ],
            Self::LiftPlatform => &[
                "lift_platform",
                "plataforma",
                "plataforma_de_elevacion",
                "plataforma_elevadora",
                "elevador",
                "tijera",
                "brazo_articulado",
            ],
            Self::Generator => &["generator", "generador", "planta_de_luz", "planta_electrica"],
            Self::Breaker => &["breaker", "rompedor", "martillo", "demoledor", "rotomartillo"],
            Self::Tamper => &["tamper", "apisonador", "bailarina", "compactador", "rammer"],
            Self::Forklift => &["forklift", "montacargas", "monta_cargas", "grua_horquilla"],
            Self::Manipulator => &[
                "manipulator",
                "manipulador",
                "manipulador_telescopico",
                "telehandler",
            ],
        }
    }

    /// Resolves a key, Spanish name or English name to a machinery type.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = normalize_token(raw);
        if token.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|candidate| candidate.aliases().contains(&token.as_str()))
    }

    /// First machinery type named anywhere inside a free-text message.
    pub fn mentioned_in(text: &str) -> Option<Self> {
        let padded = format!("_{}_", normalize_token(text));
        Self::ALL.into_iter().find(|candidate| {
            candidate.aliases().iter().any(|alias| padded.contains(&format!("_{alias}_")))
        })
    }
}

impl std::fmt::Display for MachineryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
