use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dfesync::controls::{Command, RosterCommand};
use dfesync::observability::init_logging;
use dfesync::{run_sync, Cli, Company, Roster, SqliteRoster, TaxId};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.into());
    let roster = SqliteRoster::open(&cli.roster)
        .with_context(|| format!("failed to open roster {:?}", cli.roster))?;

    match cli.command {
        Command::Sync(args) => {
            let controls = args
                .build_controls()
                .with_context(|| format!("invalid base url {:?}", args.base_url))?;
            let only = args.company.as_deref().map(TaxId::normalize);
            let summary = run_sync(&controls, &roster, only.as_ref()).map_err(|err| anyhow!(err))?;
            anyhow::ensure!(
                summary.failed.is_empty(),
                "{} of {} companies failed",
                summary.failed.len(),
                summary.failed.len() + summary.completed.len()
            );
        }
        Command::Roster(RosterCommand::Upsert {
            name,
            tax_id,
            secret,
            cursor,
        }) => {
            let company = Company::new(name, &tax_id, secret, cursor);
            roster
                .upsert_company(&company)
                .with_context(|| format!("failed to upsert {}", company.name))?;
            println!("upserted {} [{}]", company.name, company.tax_id);
        }
        Command::Roster(RosterCommand::List) => {
            for company in roster.companies().context("failed to read roster")? {
                println!("{}\t{}\t{}", company.tax_id, company.cursor, company.name);
            }
        }
    }
    Ok(())
}
