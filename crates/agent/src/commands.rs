/// Keywords handled by the conversation itself rather than by slot filling.
/// Only an exact keyword (ignoring case and surrounding blanks) is a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Reset,
    Status,
    Handoff,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "reset" => Some(Self::Reset),
            "status" => Some(Self::Status),
            "asesor" | "agente" => Some(Self::Handoff),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Status => "status",
            Self::Handoff => "handoff",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn keywords_match_case_insensitively() {
        assert_eq!(Command::parse("RESET"), Some(Command::Reset));
        assert_eq!(Command::parse("  Status \n"), Some(Command::Status));
        assert_eq!(Command::parse("Asesor"), Some(Command::Handoff));
        assert_eq!(Command::parse("agente"), Some(Command::Handoff));
    }

    #[test]
    fn keywords_inside_sentences_are_not_commands() {
        assert_eq!(Command::parse("quiero hablar con un asesor"), None);
        assert_eq!(Command::parse("reset por favor"), None);
        assert_eq!(Command::parse(""), None);
    }
}
