//! `keilpilot tools`: list registered tools.

use std::path::Path;
use std::sync::Arc;

use keilpilot_agent::ToolCatalog;
use keilpilot_core::event::EventFeed;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let registry = Arc::new(super::build_registry(&config, EventFeed::default()));
    let catalog = ToolCatalog::new(registry.clone(), &config.agent.tool_namespace);

    println!("🔧 Registered tools ({}):", registry.len());
    println!();
    for tool in registry.descriptors() {
        let marker = if catalog.is_eligible(&tool.name) { "auto" } else { "on request" };
        let tags: Vec<&str> = tool.tags.iter().map(String::as_str).collect();
        println!("   {}  [{marker}]", tool.name);
        println!("      {}", tool.description);
        if !tags.is_empty() {
            println!("      tags: {}", tags.join(", "));
        }
    }

    if config.project.is_none() {
        println!();
        println!("   ⚠️  No [project] configured; build tools will report no active project");
    }
    Ok(())
}
