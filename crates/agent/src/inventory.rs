use std::fmt::Write as _;

use leadbot_core::domain::machinery::MachineryType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryItem {
    /// `None` stands for every machinery type.
    pub machinery: Option<MachineryType>,
    pub model: String,
    pub location: String,
}

/// Equipment the bot can talk about when a user asks what is available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    items: Vec<InventoryItem>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(vec![InventoryItem {
            machinery: None,
            model: "Todos los modelos de maquinaria ligera".to_string(),
            location: "todas nuestras sucursales".to_string(),
        }])
    }
}

impl Inventory {
    pub fn new(items: Vec<InventoryItem>) -> Self {
        Self { items }
    }

    pub fn search(&self, machinery: Option<MachineryType>) -> Vec<&InventoryItem> {
        self.items
            .iter()
            .filter(|item| match (item.machinery, machinery) {
                (None, _) | (_, None) => true,
                (Some(stocked), Some(wanted)) => stocked == wanted,
            })
            .collect()
    }

    pub fn answer(&self, machinery: Option<MachineryType>) -> String {
        let matches = self.search(machinery);
        if matches.is_empty() {
            return match machinery {
                Some(machinery) => format!(
                    "Por ahora no tenemos {} disponible, pero un asesor puede buscar alternativas.",
                    machinery.label()
                ),
                None => "Contamos con un amplio inventario de maquinaria ligera.".to_string(),
            };
        }

        let mut answer = String::from("Actualmente tenemos el siguiente inventario:");
        for item in matches {
            let label = item.machinery.map(MachineryType::label).unwrap_or("maquinaria ligera");
            let _ = write!(answer, "\n- {label}: {} ({})", item.model, item.location);
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use leadbot_core::domain::machinery::MachineryType;

    use super::{Inventory, InventoryItem};

    fn item(machinery: MachineryType, model: &str) -> InventoryItem {
        InventoryItem {
            machinery: Some(machinery),
            model: model.to_string(),
            location: "Guadalajara".to_string(),
        }
    }

    #[test]
    fn default_inventory_covers_every_type() {
        let inventory = Inventory::default();
        for machinery in MachineryType::ALL {
            assert_eq!(inventory.search(Some(machinery)).len(), 1);
        }
        assert!(inventory.answer(None).starts_with("Actualmente tenemos"));
    }

    #[test]
    fn search_filters_by_machinery_type() {
        let inventory = Inventory::new(vec![
            item(MachineryType::Welder, "Shindaiwa EGW190"),
            item(MachineryType::Generator, "Generac 50 kVA"),
        ]);

        let answer = inventory.answer(Some(MachineryType::Welder));
        assert!(answer.contains("soldadora: Shindaiwa EGW190 (Guadalajara)"));
        assert!(!answer.contains("Generac"));

        assert!(inventory.answer(Some(MachineryType::Forklift)).contains("no tenemos montacargas"));
        assert_eq!(inventory.search(None).len(), 2);
    }
}
