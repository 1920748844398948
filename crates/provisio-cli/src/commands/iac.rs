use std::path::Path;

use anyhow::Context;
use provisio_core::{IacTool, Provenance, ValidationStatus};
use provisio_iac::{ValidatorRegistry, VersionStore};
use provisio_state::{IacVersion, StateStore};

fn read_source(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn print_version(v: &IacVersion) {
    println!(
        "{}  v{:<3} {:<10} {:<8} {:<11} {}{}",
        v.id,
        v.version,
        v.tool.as_str(),
        v.validation_status.as_str(),
        v.created_by.as_str(),
        &v.digest[..v.digest.len().min(12)],
        if v.is_current { "  (current)" } else { "" },
    );
}

pub async fn add(
    state: &StateStore,
    design: &str,
    tool: IacTool,
    file: &Path,
    prompt_modified: bool,
) -> anyhow::Result<()> {
    let source = read_source(file)?;
    let provenance = if prompt_modified {
        Provenance::UserPrompt
    } else {
        Provenance::System
    };
    let versions = VersionStore::new(state.clone());
    let version = versions.create(design, tool, &source, provenance).await?;

    println!("✓ Stored {} v{} ({})", version.tool, version.version, version.id);
    println!("  Validation: {}", version.validation_status.as_str());
    for err in &version.validation_errors {
        println!("  - {err}");
    }
    Ok(())
}

pub fn list(state: &StateStore, design: &str) -> anyhow::Result<()> {
    let history = VersionStore::new(state.clone()).list(design)?;
    if history.is_empty() {
        println!("No IaC versions for design {design}.");
    }
    history.iter().for_each(print_version);
    Ok(())
}

pub fn current(state: &StateStore, design: &str, tool: IacTool) -> anyhow::Result<()> {
    match VersionStore::new(state.clone()).current(design, tool)? {
        Some(v) => {
            print_version(&v);
            println!();
            print!("{}", v.source);
        }
        None => println!("No current {tool} version for design {design}."),
    }
    Ok(())
}

pub fn validate(tool: IacTool, file: &Path) -> anyhow::Result<()> {
    let source = read_source(file)?;
    let outcome = ValidatorRegistry::default().validate(&source, tool);
    println!("{}: {}", file.display(), outcome.status.as_str());
    for err in &outcome.errors {
        println!("  - {err}");
    }
    if outcome.status == ValidationStatus::Invalid {
        anyhow::bail!("validation failed");
    }
    Ok(())
}

pub fn diff(state: &StateStore, from: &str, to: &str) -> anyhow::Result<()> {
    let diff = VersionStore::new(state.clone()).diff(from, to)?;
    if diff.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    for line in &diff.removed_lines {
        println!("- {line}");
    }
    for line in &diff.added_lines {
        println!("+ {line}");
    }
    println!("{} added, {} removed", diff.added_count, diff.removed_count);
    Ok(())
}
