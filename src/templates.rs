use std::fs;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::utils::{filter_bmp, first_name};

pub const MAX_TEMPLATES: usize = 10;
const PLACEHOLDERS: [&str; 2] = ["[nome]", "[name]"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Could not load any template")]
    NoneLoaded { failed: Vec<String> },
    #[error("No templates loaded")]
    Empty,
}

/// Result of a load attempt that kept at least one template.
#[derive(Debug, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: Vec<String>,
    paths: Vec<PathBuf>,
}

impl TemplateSet {
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Reads up to ten files. The set is only replaced when at least one file loads.
    pub fn load_paths(&mut self, paths: &[PathBuf]) -> Result<LoadReport, TemplateError> {
        let mut templates = Vec::new();
        let mut loaded_paths = Vec::new();
        let mut failed = Vec::new();
        for path in paths.iter().take(MAX_TEMPLATES) {
            match fs::read_to_string(path) {
                Ok(text) => {
                    templates.push(text);
                    loaded_paths.push(path.clone());
                }
                Err(e) => {
                    log::warn!("template {} unreadable: {e}", path.display());
                    failed.push(
                        path.file_name()
                            .map(|f| f.to_string_lossy().to_string())
                            .unwrap_or_else(|| path.display().to_string()),
                    );
                }
            }
        }
        if templates.is_empty() {
            return Err(TemplateError::NoneLoaded { failed });
        }
        self.templates = templates;
        self.paths = loaded_paths;
        Ok(LoadReport { loaded: self.templates.len(), failed })
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&str, TemplateError> {
        self.templates
            .choose(rng)
            .map(String::as_str)
            .ok_or(TemplateError::Empty)
    }

    /// Picks a random template and personalises it for `full_name`.
    pub fn message_for<R: Rng + ?Sized>(&self, rng: &mut R, full_name: &str) -> Result<String, TemplateError> {
        Ok(render(self.pick(rng)?, full_name))
    }
}

pub fn render(template: &str, full_name: &str) -> String {
    let name = first_name(full_name);
    let text = PLACEHOLDERS
        .iter()
        .fold(template.to_string(), |acc, p| acc.replace(p, &name));
    filter_bmp(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_templates(tag: &str, bodies: &[&str]) -> Vec<PathBuf> {
        let dir = std::env::temp_dir().join(format!("huby-templates-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let p = dir.join(format!("t{}.txt", i));
                fs::write(&p, body).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn render_replaces_placeholder_and_filters() {
        assert_eq!(render("Oi [nome], tudo bem? 👋", "Dr. Paulo Reis"), "Oi Paulo, tudo bem? ");
        assert_eq!(render("Hi [name]!", "ana maria"), "Hi ana!");
        assert_eq!(render("Hello [nome]", ""), "Hello ");
    }

    #[test]
    fn load_reports_missing_files() {
        let mut paths = write_templates("partial", &["A [nome]", "B [nome]"]);
        paths.push(PathBuf::from("/nonexistent/huby/missing.txt"));
        let mut set = TemplateSet::default();
        let report = set.load_paths(&paths).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.failed, vec!["missing.txt".to_string()]);
        assert_eq!(set.paths().len(), 2);
    }

    #[test]
    fn failed_load_keeps_previous_set() {
        let paths = write_templates("keep", &["kept"]);
        let mut set = TemplateSet::default();
        set.load_paths(&paths).unwrap();
        let err = set.load_paths(&[PathBuf::from("/nonexistent/x.txt")]).unwrap_err();
        assert!(matches!(err, TemplateError::NoneLoaded { .. }));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn caps_at_ten_files() {
        let bodies: Vec<String> = (0..12).map(|i| format!("template {}", i)).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        let paths = write_templates("cap", &refs);
        let mut set = TemplateSet::default();
        assert_eq!(set.load_paths(&paths).unwrap().loaded, MAX_TEMPLATES);
    }

    #[test]
    fn pick_from_empty_set_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(TemplateSet::default().pick(&mut rng), Err(TemplateError::Empty)));
    }

    #[test]
    fn message_for_uses_a_loaded_template() {
        let paths = write_templates("pick", &["Olá [nome]", "Bom dia [nome]"]);
        let mut set = TemplateSet::default();
        set.load_paths(&paths).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            let msg = set.message_for(&mut rng, "Carla Dias").unwrap();
            assert!(msg == "Olá Carla" || msg == "Bom dia Carla");
        }
    }
}
