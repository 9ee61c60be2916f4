use serde::{Deserialize, Serialize};

/// Scripts written without spaces between words, where a term can sit inside a
/// longer run of letters of the same script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptClass {
    /// Precomposed Hangul syllables.
    Hangul,
    /// Hiragana and Katakana.
    Kana,
    /// CJK ideographs.
    Han,
}

impl ScriptClass {
    /// Classifies a single character; `None` for whitespace-delimited scripts,
    /// digits and punctuation.
    #[must_use]
    pub const fn of(ch: char) -> Option<Self> {
        match ch {
            // katakana middle dot separates words
            '\u{30FB}' => None,
            '\u{AC00}'..='\u{D7A3}' => Some(Self::Hangul),
            '\u{3041}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' => {
                Some(Self::Kana)
            }
            '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}' => {
                Some(Self::Han)
            }
            _ => None,
        }
    }

    /// Class of the first classified character in `text`.
    #[must_use]
    pub fn dominant(text: &str) -> Option<Self> {
        text.chars().find_map(Self::of)
    }
}
