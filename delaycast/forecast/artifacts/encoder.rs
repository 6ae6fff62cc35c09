use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Fixed value-to-code mapping for a categorical column; a value's code is
/// its position in `classes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    /// Column the mapping applies to.
    pub column: String,
    /// Known categories in code order.
    pub classes: Vec<String>,
}

impl CategoryEncoder {
    /// Fits codes over the distinct values seen, sorted lexicographically.
    #[must_use]
    pub fn fit<'a, I>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            column: column.into(),
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    /// Code for a category, `None` if it was never seen.
    #[must_use]
    pub fn encode(&self, value: &str) -> Option<u32> {
        self.classes
            .iter()
            .position(|class| class == value)
            .and_then(|code| u32::try_from(code).ok())
    }

    /// Rejects mappings with repeated classes.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        match self.classes.iter().find(|class| !seen.insert(class.as_str())) {
            Some(duplicate) => Err(format!("class `{duplicate}` listed twice")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_sorts_distinct_values() {
        let encoder = CategoryEncoder::fit(
            "status_code",
            ["TK_NotStart", "TK_Active", "TK_NotStart", "TK_Complete"],
        );
        assert_eq!(encoder.classes, ["TK_Active", "TK_Complete", "TK_NotStart"]);
        assert_eq!(encoder.encode("TK_Complete"), Some(1));
        assert_eq!(encoder.encode("TK_Suspended"), None);
    }

    #[test]
    fn persisted_order_is_kept() {
        let encoder = CategoryEncoder {
            column: "status_code".into(),
            classes: vec!["TK_NotStart".into(), "TK_Active".into()],
        };
        encoder.validate().unwrap();
        assert_eq!(encoder.encode("TK_Active"), Some(1));
    }

    #[test]
    fn duplicate_classes_are_invalid() {
        let encoder = CategoryEncoder {
            column: "status_code".into(),
            classes: vec!["A".into(), "A".into()],
        };
        assert!(encoder.validate().is_err());
    }
}
