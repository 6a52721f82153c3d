//! Variants command - list the available variants

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use pledge_core::{Variant, VariantRegistry, VariantSpec};

#[derive(Args)]
pub struct VariantsArgs {
    /// Variant definitions file (built-in variants when absent)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Print the definitions as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: VariantsArgs) -> Result<()> {
    let registry = match &args.file {
        Some(path) => VariantRegistry::load(path)?,
        None => VariantRegistry::builtin(),
    };

    if args.json {
        let specs: Vec<VariantSpec> = registry.iter().map(|v| v.to_spec()).collect();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    println!(
        "{:<14} {:>7} {:>6}  {:<28} {:<10} {:>9}",
        "ID", "MEMBERS", "ROUNDS", "CHOICES", "RULE", "BENCHMARK"
    );
    for variant in registry.iter() {
        println!("{}", format_row(variant));
        if let Some(bonus) = format_multipliers(variant) {
            println!("{:<14} {}", "", bonus);
        }
    }
    Ok(())
}

fn format_row(variant: &Variant) -> String {
    let default = variant.symbol(variant.default_choice());
    let choices = variant
        .choices()
        .iter()
        .map(|c| if c == default { format!("{}*", c) } else { c.clone() })
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{:<14} {:>7} {:>6}  {:<28} {:<10} {:>9}",
        variant.id().as_str(),
        variant.member_count(),
        variant.round_count(),
        choices,
        variant.rule().name(),
        variant.group_benchmark()
    )
}

/// Non-trivial round multipliers, e.g. `round 4 x3, round 8 x10`
fn format_multipliers(variant: &Variant) -> Option<String> {
    let bonus: Vec<String> = (1..=variant.round_count())
        .filter(|&r| variant.multiplier(r) != 1)
        .map(|r| format!("round {} x{}", r, variant.multiplier(r)))
        .collect();
    (!bonus.is_empty()).then(|| bonus.join(", "))
}
