use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One rule plugin with a single error key
#[derive(Debug, Clone)]
pub struct RuleFixture {
    visibility: &'static str,
    name: String,
    error_key: String,
    condition: Option<String>,
    template: Vec<(String, String)>,
    impact: String,
    likelihood: u8,
}

impl RuleFixture {
    pub fn new(name: &str, error_key: &str) -> Self {
        Self {
            visibility: "external",
            name: name.to_string(),
            error_key: error_key.to_string(),
            condition: None,
            template: Vec::new(),
            impact: "medium".to_string(),
            likelihood: 2,
        }
    }

    pub fn internal(mut self) -> Self {
        self.visibility = "internal";
        self
    }

    /// Condition as a YAML mapping written at column zero
    pub fn condition(mut self, yaml: &str) -> Self {
        self.condition = Some(yaml.to_string());
        self
    }

    pub fn template(mut self, key: &str, binding: &str) -> Self {
        self.template.push((key.to_string(), binding.to_string()));
        self
    }

    pub fn impact(mut self, impact: &str) -> Self {
        self.impact = impact.to_string();
        self
    }

    pub fn likelihood(mut self, likelihood: u8) -> Self {
        self.likelihood = likelihood;
        self
    }

    pub fn fqdn(&self) -> String {
        format!("ccx_rules_ocp.{}.rules.{}", self.visibility, self.name)
    }

    fn metadata_yaml(&self) -> String {
        let mut out = format!(
            "description: \"{name}: {key}\"\nimpact: {impact}\nlikelihood: {likelihood}\npublish_date: \"2026-01-01 00:00:00\"\nstatus: active\ntags:\n  - fixture\n",
            name = self.name,
            key = self.error_key,
            impact = self.impact,
            likelihood = self.likelihood,
        );
        if let Some(condition) = &self.condition {
            out.push_str("condition:\n");
            for line in condition.lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
        if !self.template.is_empty() {
            out.push_str("template:\n");
            for (key, binding) in &self.template {
                out.push_str(&format!("  {key}: \"{binding}\"\n"));
            }
        }
        out
    }
}

/// Rule content root in a temporary directory
#[derive(Debug)]
pub struct ContentTree {
    dir: TempDir,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the root, creating parents
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn rule(&self, rule: RuleFixture) -> &Self {
        let base = format!("{}/rules/{}", rule.visibility, rule.name);
        self.write(
            &format!("{base}/plugin.yaml"),
            &format!(
                "plugin:\n  name: {name}\n  node_id: \"\"\n  product_code: aggregator\n  python_module: {fqdn}\n",
                name = rule.name,
                fqdn = rule.fqdn(),
            ),
        );
        let key_dir = format!("{base}/{}", rule.error_key);
        self.write(&format!("{key_dir}/metadata.yaml"), &rule.metadata_yaml());
        self.write(
            &format!("{key_dir}/generic.md"),
            &format!("The cluster is affected by **{}**.\n\nSee the resolution.", rule.error_key),
        );
        self.write(&format!("{key_dir}/reason.md"), "Detected from archive facts.");
        self.write(&format!("{key_dir}/resolution.md"), "Follow the documented procedure.");
        self.write(&format!("{key_dir}/more_info.md"), "https://access.example.com/solutions/1");
        self
    }
}
