//! `stepwise tools` — list the built-in tools.

use stepwise_core::tool::ToolDescriptor;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let registry = stepwise_tools::default_registry()?;

    if json {
        let schemas: Vec<_> = registry
            .schemas()
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.json_schema(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&schemas)?);
    } else {
        println!("{} tools available:\n", registry.len());
        let listing: String = registry.schemas().iter().map(ToolDescriptor::render).collect();
        println!("{listing}");
    }
    Ok(())
}
