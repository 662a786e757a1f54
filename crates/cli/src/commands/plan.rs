//! `buildloop plan`: turn a request into a stored build plan.

use super::{Runtime, print_usage};

/// Plans the build and returns the id it was stored under.
pub async fn run(
    runtime: &Runtime,
    request: &str,
    build_id: Option<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    let build_id = build_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("📝 Planning build {build_id} with {}...", runtime.config.model);
    let result = runtime.pipeline.plan(request, &build_id).await?;
    let plan = &result.plan;

    println!();
    println!("  Summary:   {}", plan.summary);
    println!("  Language:  {}", plan.stack.language);
    if let Some(framework) = &plan.stack.framework {
        println!("  Framework: {framework}");
    }
    for (index, phase) in plan.phases.iter().enumerate() {
        println!();
        println!("  Tier {}: {} ({} files)", index + 1, phase.name, phase.file_manifest.len());
        for file in &phase.file_manifest {
            println!("    • {:<32} {}", file.path, file.purpose);
        }
    }
    println!();
    println!("  Turns:     {}", result.iterations);
    print_usage(&result.usage);
    println!();
    println!("  ✅ Plan stored. Run `buildloop build {build_id}` to build it.");

    Ok(build_id)
}
