use serde::{Deserialize, Serialize};

use super::manifest::ProjectManifest;

/// Partial update of the manifest metadata. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub candidate: Option<String>,
    pub supervisor: Option<String>,
    pub year: Option<String>,
    pub citation_style: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.candidate.is_none()
            && self.supervisor.is_none()
            && self.year.is_none()
            && self.citation_style.is_none()
    }

    /// Apply every present field. Returns whether the manifest changed.
    pub fn apply_to(self, manifest: &mut ProjectManifest) -> bool {
        let mut changed = false;
        let mut set = |field: &mut String, value: Option<String>| {
            if let Some(value) = value {
                if *field != value {
                    *field = value;
                    changed = true;
                }
            }
        };

        set(&mut manifest.title, self.title);
        set(&mut manifest.author, self.author);
        set(&mut manifest.candidate, self.candidate);
        set(&mut manifest.supervisor, self.supervisor);
        set(&mut manifest.year, self.year);
        set(&mut manifest.citation_style, self.citation_style);

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_only_present_fields() {
        let mut manifest = ProjectManifest::new("Title", "Author");
        let patch = SettingsPatch {
            year: Some("2025".to_string()),
            citation_style: Some("apa".to_string()),
            ..Default::default()
        };

        assert!(patch.apply_to(&mut manifest));
        assert_eq!(manifest.title, "Title");
        assert_eq!(manifest.year, "2025");
        assert_eq!(manifest.citation_style, "apa");
    }

    #[test]
    fn unchanged_values_report_no_change() {
        let mut manifest = ProjectManifest::new("Title", "Author");
        let patch = SettingsPatch {
            title: Some("Title".to_string()),
            ..Default::default()
        };
        assert!(!patch.apply_to(&mut manifest));
    }
}
