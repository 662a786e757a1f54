//! `buildloop audit`: independently audit a stored plan or generated file.

use buildloop_agent::PipelineError;
use buildloop_contracts::AuditVerdict;
use buildloop_core::ArtifactKind;

use super::{Runtime, print_usage};

pub async fn run(
    runtime: &Runtime,
    build_id: &str,
    file: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (kind, key) = match file {
        Some(path) => {
            let report = runtime.pipeline.report(build_id).await?;
            let key = report
                .file(path)
                .and_then(|f| f.artifact_key.clone())
                .ok_or_else(|| format!("build {build_id} produced no content for {path}"))?;
            (ArtifactKind::GeneratedFile, key)
        }
        None => (ArtifactKind::Plan, build_id.to_string()),
    };

    let document = runtime
        .store
        .fetch(kind.collection(), &key)
        .await?
        .ok_or_else(|| match kind {
            ArtifactKind::Plan => PipelineError::PlanNotFound(build_id.to_string()).to_string(),
            _ => format!("no {kind} stored under {}/{key}", kind.collection()),
        })?;

    println!("🔎 Auditing {kind} {key}...");
    let result = runtime.pipeline.audit_artifact(build_id, kind, &document).await?;
    print_verdict(&result.verdict);
    println!();
    println!("  Turns:     {}", result.iterations);
    print_usage(&result.usage);
    Ok(())
}

fn print_verdict(verdict: &AuditVerdict) {
    println!();
    if verdict.passed() {
        println!("  ✅ pass: {}", verdict.summary);
    } else {
        println!("  ❌ fail: {}", verdict.summary);
    }
    for finding in &verdict.findings {
        let location = finding.path.as_deref().map(|p| format!(" {p}:")).unwrap_or_default();
        println!(
            "     {:?} [{}]{location} {}",
            finding.severity, finding.rule, finding.message
        );
    }
}
