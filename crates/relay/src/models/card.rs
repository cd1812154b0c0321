use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
}

/// One named skill an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl AgentSkill {
    pub fn new<I, N, D>(id: I, name: N, description: D) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_examples<S: Into<String>>(mut self, examples: impl IntoIterator<Item = S>) -> Self {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }
}

/// Static self-description of an agent, served at the well-known card path
/// and used as routing context by orchestrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Endpoint that accepts JSON-RPC messages for this agent
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub supports_authenticated_extended_card: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_modes() -> Vec<String> {
    vec!["text".to_string()]
}

impl AgentCard {
    pub fn new<N: Into<String>, D: Into<String>, U: Into<String>>(
        name: N,
        description: D,
        url: U,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            version: default_version(),
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
            capabilities: AgentCapabilities { streaming: true },
            skills: Vec::new(),
            supports_authenticated_extended_card: false,
        }
    }

    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    /// Every tag across all skills, lowercased
    pub fn tags(&self) -> Vec<String> {
        self.skills
            .iter()
            .flat_map(|skill| skill.tags.iter().map(|tag| tag.to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_card_wire_shape() {
        let card = AgentCard::new("Forex Agent", "Converts currencies", "http://localhost:10001/")
            .with_skill(
                AgentSkill::new("forex", "Forex", "Currency conversion").with_tags(["forex", "FX"]),
            );

        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["defaultInputModes"], json!(["text"]));
        assert_eq!(value["capabilities"]["streaming"], json!(true));
        assert_eq!(value["skills"][0]["tags"], json!(["forex", "FX"]));
        assert_eq!(card.tags(), vec!["forex", "fx"]);
    }

    #[test]
    fn test_card_lenient_decode() {
        let card: AgentCard = serde_json::from_value(json!({"name": "Bare"})).unwrap();
        assert_eq!(card.name, "Bare");
        assert!(card.url.is_empty());
        assert_eq!(card.default_output_modes, vec!["text"]);
        assert!(card.skills.is_empty());
    }
}
