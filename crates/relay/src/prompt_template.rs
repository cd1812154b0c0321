use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Render an inline tera template against any serializable context.
///
/// Templates ship inside the binary (`include_str!`) so rendering never touches disk.
pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_renders_struct_fields() {
        #[derive(Serialize)]
        struct Greeting<'a> {
            agent: &'a str,
            peers: usize,
        }

        let rendered = load_prompt(
            "{{ agent }} knows {{ peers }} peers",
            &Greeting {
                agent: "Relay",
                peers: 2,
            },
        )
        .unwrap();
        assert_eq!(rendered, "Relay knows 2 peers");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let result = load_prompt("Ask {{ agent }} about {{ topic }}", &json!({"agent": "Stays"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_loops_over_replies() {
        let template = "{% for reply in replies %}[{{ reply.agent }}] {{ reply.text }}\n{% endfor %}";
        let context = json!({
            "replies": [
                {"agent": "Weather", "text": "Sunny"},
                {"agent": "Stays", "text": "Two rooms left"}
            ]
        });
        assert_eq!(
            load_prompt(template, &context).unwrap(),
            "[Weather] Sunny\n[Stays] Two rooms left\n"
        );

        let empty = json!({"replies": []});
        assert_eq!(load_prompt(template, &empty).unwrap(), "");
    }

    #[test]
    fn test_invalid_template() {
        let result = load_prompt("{% for reply in %}", &json!({}));
        assert!(result.is_err());
    }
}
