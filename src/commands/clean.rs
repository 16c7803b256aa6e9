//! Remove sandbox containers left behind by a crashed worker.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use crate::config::Config;
use crate::sandbox::{DockerSandbox, SandboxDriver};

/// Format the clean results as a displayable string
pub fn format_results(removed: u32) -> String {
    let mut out = String::new();
    if removed == 0 {
        writeln!(&mut out, "\n{} No orphaned sandboxes found.", "ℹ".blue()).unwrap();
    } else {
        let noun = if removed == 1 { "sandbox" } else { "sandboxes" };
        writeln!(
            &mut out,
            "\n{} Removed {} orphaned {}.",
            "✓".green(),
            removed.to_string().bold(),
            noun
        )
        .unwrap();
    }
    out
}

/// Entry point: connects to Docker and removes labelled containers
pub async fn run(config: &Config) -> Result<()> {
    let sandbox = DockerSandbox::connect(config.sandbox.clone())
        .await
        .context("Failed to connect to Docker. Is Docker running?")?;

    let removed = sandbox
        .cleanup_orphaned()
        .await
        .context("Failed to remove orphaned sandboxes")?;

    print!("{}", format_results(removed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results_empty() {
        let output = format_results(0);
        assert!(output.contains("No orphaned sandboxes found"));
    }

    #[test]
    fn test_format_results_single() {
        let output = format_results(1);
        assert!(output.contains("orphaned sandbox."));
    }

    #[test]
    fn test_format_results_many() {
        let output = format_results(3);
        assert!(output.contains('3'));
        assert!(output.contains("orphaned sandboxes"));
    }
}
