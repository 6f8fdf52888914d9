//! Persistent storage for the emulator

use crate::EmulatorState;
use anyhow::{Context, Result};
use std::path::Path;

/// JSON file holding the emulator state between runs
#[derive(Debug, Clone)]
pub struct FileStorage {
    file_path: String,
}

impl FileStorage {
    pub fn new(file_path: String) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }

    /// Load state from file; `None` when nothing has been saved yet
    pub async fn load(&self) -> Result<Option<EmulatorState>> {
        if !self.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| format!("reading emulator state from {}", self.file_path))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("decoding emulator state in {}", self.file_path))?;
        Ok(Some(state))
    }

    /// Save state to file
    pub async fn save(&self, state: &EmulatorState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(&self.file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&self.file_path, content)
            .await
            .with_context(|| format!("writing emulator state to {}", self.file_path))?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.file_path).exists()
    }
}

/// Renders emulator state for people
pub struct StateExporter;

impl StateExporter {
    /// Export state as a human-readable summary
    pub fn to_summary(state: &EmulatorState) -> String {
        let mut summary = String::new();
        summary.push_str("🦀 Cluster Emulator State Summary\n");
        summary.push_str("=================================\n\n");

        summary.push_str("📊 **Statistics:**\n");
        summary.push_str(&format!("- Region: {}\n", state.region));
        summary.push_str(&format!("- Roles: {}\n", state.roles.len()));
        summary.push_str(&format!("- Clusters: {}\n", state.clusters.len()));
        summary.push_str(&format!("- Security Groups: {}\n\n", state.security_groups.len()));

        if !state.roles.is_empty() {
            summary.push_str("👥 **Roles:**\n");
            for role in state.roles.values() {
                summary.push_str(&format!("- {} ({})\n", role.name, role.arn));
                for policy in &role.attached_policies {
                    summary.push_str(&format!("  • {}\n", policy));
                }
            }
            summary.push('\n');
        }

        if !state.clusters.is_empty() {
            summary.push_str("🗄️ **Clusters:**\n");
            for cluster in state.clusters.values() {
                summary.push_str(&format!(
                    "- {}: {} ({} x {}, {})\n",
                    cluster.identifier,
                    cluster.status,
                    cluster.node_count,
                    cluster.node_type,
                    cluster.cluster_type
                ));
            }
            summary.push('\n');
        }

        let rules: Vec<_> = state
            .security_groups
            .iter()
            .flat_map(|sg| sg.ingress.iter().map(move |rule| (&sg.group, rule)))
            .collect();
        if !rules.is_empty() {
            summary.push_str("🔐 **Ingress:**\n");
            for (i, (group, rule)) in rules.iter().enumerate() {
                summary.push_str(&format!(
                    "{}. {} → {} {}-{} from {}\n",
                    i + 1,
                    group.group_id,
                    rule.protocol,
                    rule.from_port,
                    rule.to_port,
                    rule.cidr
                ));
            }
        }

        summary
    }
}
