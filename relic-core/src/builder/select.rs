//! Deterministic selection of display names and icons

use std::collections::BTreeMap;

use crate::model::Icon;

/// Language codes in the order localized names are preferred
pub const LANGUAGE_ORDER: [&str; 9] = [
    "en_GB", "en_US", "en_AU", "fr_FR", "de_DE", "it_IT", "nl_NL", "bg_BG", "",
];

/// Largest icon edge considered for display
const MAX_DISPLAY_ICON_SIZE: u32 = 48;

/// First localized name in [`LANGUAGE_ORDER`], if any
pub fn select_name(names: &BTreeMap<String, String>) -> Option<&str> {
    LANGUAGE_ORDER
        .iter()
        .find_map(|language| names.get(*language))
        .map(String::as_str)
}

/// Square icon no larger than 48px with the highest (bit depth, width)
pub fn select_icon<'a, I>(icons: I) -> Option<&'a Icon>
where
    I: IntoIterator<Item = &'a Icon>,
{
    icons
        .into_iter()
        .filter(|icon| icon.width == icon.height && icon.width <= MAX_DISPLAY_ICON_SIZE)
        // Ties keep the first candidate so the choice is stable.
        .fold(None, |best: Option<&Icon>, icon| match best {
            Some(current) if (current.bit_depth, current.width) >= (icon.bit_depth, icon.width) => {
                Some(current)
            }
            _ => Some(icon),
        })
}

pub fn format_uid(uid: u32) -> String {
    format!("0x{uid:08x}")
}
