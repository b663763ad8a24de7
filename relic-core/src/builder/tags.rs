//! Format and era tags discovered by sniffing files

use std::collections::BTreeSet;
use std::path::Path;

use crate::gateway::{DecoderGateway, Recognition};

const UNKNOWN_TAG: &str = "unknown";

/// Collapse decoder vocabulary into catalog tags
pub fn remap_tag(tag: &str) -> &str {
    match tag {
        "opl" | "opo" | "opa" => "opl",
        "er5" => "epoc32",
        other => other,
    }
}

/// Accumulates tags from recognized files
#[derive(Debug, Default)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn add(&mut self, recognition: &Recognition) {
        for tag in [&recognition.era, &recognition.kind].into_iter().flatten() {
            let tag = remap_tag(tag);
            if tag != UNKNOWN_TAG {
                self.0.insert(tag.to_string());
            }
        }
    }

    /// Recognize `path`; files the decoder cannot sniff contribute nothing
    pub fn scan(&mut self, gateway: &dyn DecoderGateway, path: &Path) {
        if let Ok(recognition) = gateway.recognize(path) {
            self.add(&recognition);
        }
    }

    pub fn into_inner(self) -> BTreeSet<String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tags_are_remapped_and_unknown_dropped() {
        let mut tags = TagSet::default();
        tags.add(&Recognition {
            era: Some("er5".to_string()),
            kind: Some("opo".to_string()),
        });
        tags.add(&Recognition {
            era: None,
            kind: Some("unknown".to_string()),
        });
        tags.add(&Recognition {
            era: Some("sibo".to_string()),
            kind: Some("app".to_string()),
        });

        let tags: Vec<_> = tags.into_inner().into_iter().collect();
        assert_eq!(tags, vec!["app", "epoc32", "opl", "sibo"]);
    }
}
