//! Print the language runtime table.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::path::Path;

use crate::config::Config;
use crate::language::LanguageRegistry;

/// Memory limit used to render example run commands.
const EXAMPLE_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

/// Format the registry as a displayable table
pub fn format_table(registry: &LanguageRegistry) -> String {
    let source = Path::new("<dir>/<source>");
    let mut out = String::new();

    for lc in registry.iter() {
        writeln!(&mut out, "\n{}", lc.language.to_string().bold()).unwrap();
        writeln!(&mut out, "  Image:    {}", lc.image.cyan()).unwrap();
        let compile = lc
            .compile_command(source)
            .map_or_else(|| "none".to_string(), |c| c.join(" "));
        writeln!(&mut out, "  Compile:  {}", compile.cyan()).unwrap();
        writeln!(
            &mut out,
            "  Run:      {}",
            lc.run_command(source, EXAMPLE_MEMORY_LIMIT).join(" ").cyan()
        )
        .unwrap();
    }

    out
}

pub async fn run(config: &Config) -> Result<()> {
    let registry = LanguageRegistry::from_config(config)?;
    print!("{}", format_table(&registry));
    Ok(())
}
