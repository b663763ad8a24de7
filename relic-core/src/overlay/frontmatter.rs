//! Markdown documents with a YAML front matter block

use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub fields: Map<String, Value>,
    pub body: String,
}

/// Split `input` into front matter fields and body
///
/// Input without a leading `---` block is all body. A block that is not a
/// YAML mapping contributes no fields.
pub fn parse_document(input: &str) -> Document {
    let input = input.trim_start_matches('\u{feff}');
    let mut lines = input.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return Document::default();
    };
    if first.trim_end() != "---" {
        return Document {
            fields: Map::new(),
            body: input.to_string(),
        };
    }

    let mut yaml = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            closed = true;
            break;
        }
        yaml.push_str(line);
    }
    if !closed {
        return Document {
            fields: Map::new(),
            body: input.to_string(),
        };
    }

    Document {
        fields: parse_fields(&yaml),
        body: lines.collect(),
    }
}

fn parse_fields(yaml: &str) -> Map<String, Value> {
    if yaml.trim().is_empty() {
        return Map::new();
    }
    let parsed = serde_yaml_ng::from_str::<serde_yaml_ng::Value>(yaml)
        .map_err(|e| e.to_string())
        .and_then(|value| serde_json::to_value(value).map_err(|e| e.to_string()));
    match parsed {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(_) => {
            warn!("Front matter is not a mapping");
            Map::new()
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse front matter");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fields_and_body() {
        let document = parse_document("---\nname: Chess\nyear: 1998\ntags:\n  - board\n---\nA classic.\n");
        assert_eq!(document.fields["name"], Value::String("Chess".into()));
        assert_eq!(document.fields["year"], Value::from(1998));
        assert_eq!(document.fields["tags"][0], Value::String("board".into()));
        assert_eq!(document.body, "A classic.\n");
    }

    #[test]
    fn test_without_front_matter() {
        let document = parse_document("Just text.");
        assert!(document.fields.is_empty());
        assert_eq!(document.body, "Just text.");
    }

    #[test]
    fn test_unterminated_block_is_body() {
        let document = parse_document("---\nname: x\n");
        assert!(document.fields.is_empty());
        assert_eq!(document.body, "---\nname: x\n");
    }

    #[test]
    fn test_bom_and_empty_block() {
        let document = parse_document("\u{feff}---\n---\nBody");
        assert!(document.fields.is_empty());
        assert_eq!(document.body, "Body");
    }
}
