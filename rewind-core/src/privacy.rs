//! Privacy vocabulary shared by capture and configuration.
//!
//! A node's privacy is a [`PrivacyLevel`] plus a `sealed` bit. Levels are
//! ordered from most permissive to most restrictive:
//!
//! ```text
//!  Allow < MaskFormsOnly < Mask < Hidden < Ignore
//! ```
//!
//! `Hidden`, `Ignore` and every sealed privacy are *final*: descendants
//! inherit them no matter what they declare. Anything else is overridden by
//! a descendant's own explicit level.

use serde::{Deserialize, Serialize};

/// Attribute carrying an explicit privacy token.
pub const PRIVACY_ATTR_NAME: &str = "data-replay-privacy";

/// Class prefix carrying an explicit privacy token (`replay-privacy-mask`).
pub const PRIVACY_CLASS_PREFIX: &str = "replay-privacy-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivacyLevel {
    #[default]
    Allow,
    MaskFormsOnly,
    Mask,
    Hidden,
    Ignore,
}

impl PrivacyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::MaskFormsOnly => "mask-forms-only",
            Self::Mask => "mask",
            Self::Hidden => "hidden",
            Self::Ignore => "ignore",
        }
    }
}

/// Resolved privacy of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Privacy {
    level: PrivacyLevel,
    sealed: bool,
}

impl Privacy {
    pub const ALLOW: Privacy = Privacy::new(PrivacyLevel::Allow);
    pub const MASK_FORMS_ONLY: Privacy = Privacy::new(PrivacyLevel::MaskFormsOnly);
    pub const MASK: Privacy = Privacy::new(PrivacyLevel::Mask);
    pub const HIDDEN: Privacy = Privacy::new(PrivacyLevel::Hidden);
    pub const IGNORE: Privacy = Privacy::new(PrivacyLevel::Ignore);

    pub const fn new(level: PrivacyLevel) -> Self {
        Self { level, sealed: false }
    }

    pub const fn sealed(level: PrivacyLevel) -> Self {
        Self { level, sealed: true }
    }

    #[inline]
    pub fn level(self) -> PrivacyLevel {
        self.level
    }

    #[inline]
    pub fn is_sealed(self) -> bool {
        self.sealed
    }

    /// Final privacies propagate unconditionally to descendants.
    #[inline]
    pub fn is_final(self) -> bool {
        self.sealed || self.level >= PrivacyLevel::Hidden
    }

    /// Hidden or ignored: nothing below this node is captured.
    #[inline]
    pub fn is_hidden(self) -> bool {
        self.level >= PrivacyLevel::Hidden
    }

    /// Parse a privacy token as found in markup. Unknown tokens yield `None`.
    pub fn parse_token(token: &str) -> Option<Privacy> {
        let token = token.trim().to_ascii_lowercase();
        let (base, sealed) = match token.strip_suffix("-sealed") {
            Some(base) => (base, true),
            None => (token.as_str(), false),
        };
        let level = match base {
            "allow" => PrivacyLevel::Allow,
            "mask" => PrivacyLevel::Mask,
            "hidden" => PrivacyLevel::Hidden,
            "mask-forms-only" => PrivacyLevel::MaskFormsOnly,
            // deprecated aliases
            "mask-user-input" | "input-ignored" | "input-masked" if !sealed => {
                PrivacyLevel::MaskFormsOnly
            }
            _ => return None,
        };
        Some(Privacy { level, sealed })
    }
}

impl From<PrivacyLevel> for Privacy {
    fn from(level: PrivacyLevel) -> Self {
        Self::new(level)
    }
}

/// Combine an inherited privacy with a node's own explicit privacy.
pub fn reconcile(inherited: Privacy, own: Option<Privacy>) -> Privacy {
    if inherited.is_final() {
        return inherited;
    }
    own.unwrap_or(inherited)
}
