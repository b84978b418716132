use crate::catalog::{self, ProvisioningStep};
use crate::cli::{CatalogArgs, RunArgs, VerifyArgs};
use crate::config::{Settings, Sources};
use crate::gateway::Session;
use crate::runner::{self, RunOptions};
use crate::summary::RunSummary;
use crate::verify::{self, Expectations};
use anyhow::{Context, Result};
use std::path::Path;

const RULE_WIDTH: usize = 60;

pub fn run_provision(args: RunArgs) -> Result<RunSummary> {
    let sources = Sources::load(args.connection.config.as_deref())?;
    let settings = sources.resolve(&args.connection, &args.checks, args.strict_existing)?;
    let steps = load_steps(args.catalog.as_deref(), &settings.company)?;
    let echo = !args.output.json;

    if echo {
        println!("🚀 Provisioning {} on {}", settings.company, settings.base_url);
        println!("{}", "=".repeat(RULE_WIDTH));
    }
    let session = open_session(&settings, echo)?;

    let options = RunOptions {
        existing_is_success: settings.existing_is_success,
        echo,
    };
    let mut summary = runner::run(&session, &steps, &options);
    summary.checks = run_checks(&session, &settings, echo);
    report(&summary, echo)?;
    Ok(summary)
}

pub fn run_verify(args: VerifyArgs) -> Result<RunSummary> {
    let sources = Sources::load(args.connection.config.as_deref())?;
    let settings = sources.resolve(&args.connection, &args.checks, false)?;
    let echo = !args.output.json;

    let session = open_session(&settings, echo)?;
    let summary = RunSummary {
        steps: Vec::new(),
        checks: run_checks(&session, &settings, echo),
    };
    report(&summary, echo)?;
    Ok(summary)
}

pub fn run_catalog(args: CatalogArgs) -> Result<()> {
    let sources = Sources::load(args.config.as_deref())?;
    let company = sources.company(args.company.as_deref());
    let steps = load_steps(args.catalog.as_deref(), &company)?;
    let json = serde_json::to_string_pretty(&steps).context("serialize catalog")?;
    println!("{json}");
    Ok(())
}

fn load_steps(path: Option<&Path>, company: &str) -> Result<Vec<ProvisioningStep>> {
    match path {
        Some(path) => catalog::load(path, company),
        None => Ok(catalog::builtin(company)),
    }
}

fn open_session(settings: &Settings, echo: bool) -> Result<Session> {
    let session = Session::authenticate(settings).context("login failed")?;
    if echo {
        println!("✅ Logged in as {} at {}", session.user(), session.base_url());
    }
    Ok(session)
}

fn run_checks(session: &Session, settings: &Settings, echo: bool) -> Vec<crate::summary::Check> {
    let expectations = Expectations {
        mount: settings.mount.clone(),
        expected_country: settings.expected_country.clone(),
    };
    if echo {
        println!("\n🧪 Running checks...");
    }
    let checks = verify::verify(session, &expectations);
    if echo {
        for line in verify::transcript(&checks) {
            println!("{line}");
        }
    }
    checks
}

fn report(summary: &RunSummary, echo: bool) -> Result<()> {
    if !echo {
        println!("{}", summary.to_json().context("serialize run summary")?);
        return Ok(());
    }
    println!("\n{}", "=".repeat(RULE_WIDTH));
    print!("{}", summary.render_text());
    if summary.has_failures() {
        println!("⚠️  Finished with failures");
    } else {
        println!("🎉 Finished cleanly");
    }
    Ok(())
}
