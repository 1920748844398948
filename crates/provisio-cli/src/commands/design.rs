use std::path::Path;

use anyhow::Context;
use provisio_core::DesignType;
use provisio_state::{InfrastructureDesign, StateStore};

pub fn create(
    state: &StateStore,
    file: &Path,
    provider: Option<String>,
    design_type: DesignType,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let architecture: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let mut design = InfrastructureDesign::new(design_type, architecture);
    design.provider = provider;
    state.put_design(&design)?;

    println!("✓ Created design {}", design.id);
    Ok(())
}

pub fn list(state: &StateStore) -> anyhow::Result<()> {
    let designs = state.list_designs()?;
    if designs.is_empty() {
        println!("No designs.");
        return Ok(());
    }
    for d in designs {
        println!(
            "{}  {:<7} {:<10} {}",
            d.id,
            d.design_type.as_str(),
            d.provider.as_deref().unwrap_or("-"),
            d.status.as_str(),
        );
    }
    Ok(())
}
