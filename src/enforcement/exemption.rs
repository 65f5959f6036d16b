use super::collaborators::PartRef;
use crate::config::PartTypeRule;

/// Decides whether a part may never be punished.
pub trait ExemptionPredicate: Send + Sync {
    fn is_exempt(&self, part: &PartRef) -> bool;
}

/// Exemptions from configured type/subtype rules.
#[derive(Debug, Clone, Default)]
pub struct PartTypeExemptions {
    rules: Vec<PartTypeRule>,
}

impl PartTypeExemptions {
    pub fn new(rules: &[PartTypeRule]) -> Self {
        Self {
            rules: rules.to_vec(),
        }
    }

    fn matches(rule: &PartTypeRule, part: &PartRef) -> bool {
        if !rule.type_id.eq_ignore_ascii_case(&part.type_id) {
            return false;
        }
        rule.subtype == "*" || rule.subtype.eq_ignore_ascii_case(&part.subtype)
    }
}

impl ExemptionPredicate for PartTypeExemptions {
    fn is_exempt(&self, part: &PartRef) -> bool {
        self.rules.iter().any(|rule| Self::matches(rule, part))
    }
}
