//! `buildloop build`: build every file of a stored plan.

use buildloop_agent::{BuildReport, BuildStatus};
use buildloop_state::FileStatus;

use super::{Runtime, print_usage};

pub async fn run(runtime: &Runtime, build_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔨 Building {build_id}...");
    let report = runtime.pipeline.build(build_id).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!();
    for tier in &report.tiers {
        let summary = &tier.summary;
        println!(
            "  {}: {}/{} passed, {} fix rounds",
            tier.name, summary.passed, summary.files, summary.fix_rounds
        );
    }

    println!();
    for file in &report.files {
        let marker = match file.status {
            FileStatus::Passed => "✅",
            FileStatus::NeedsReview => "⚠️ ",
            FileStatus::Pending | FileStatus::Generated => "⏳",
        };
        print!(
            "  {marker} {:<32} audit: {:<4} fixes: {} turns: {}",
            file.path,
            file.audit_status.as_deref().unwrap_or("-"),
            file.fix_rounds,
            file.iterations
        );
        match &file.error {
            Some(error) => println!("  ({error})"),
            None => println!(),
        }
        for finding in &file.findings {
            println!("       [{}] {}", finding.rule, finding.message);
        }
    }

    println!();
    let elapsed = report.finished_at - report.started_at;
    println!("  Elapsed:   {}s", elapsed.num_seconds());
    print_usage(&report.usage);
    println!();
    match report.status {
        BuildStatus::Passed => println!("  ✅ Build passed"),
        BuildStatus::NeedsReview => {
            let count = report
                .files
                .iter()
                .filter(|f| f.status != FileStatus::Passed)
                .count();
            println!("  ⚠️  Build needs review: {count} file(s) did not pass their audit");
        }
    }
}
