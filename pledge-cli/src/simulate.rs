//! Simulate command - scripted participants through an in-process engine
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: run() - orchestration
//! - Level 2: form_groups(), play_out(), report_results()
//! - Level 3: play_round(), wait_for_deadlines()
//! - Level 4: strategies, timing

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use pledge_core::{GroupId, ParticipantId, QueueKey, Status, VariantRegistry};
use pledge_engine::{Engine, Ports, Recorder, Timing};

// ============================================================================
// COMMAND ARGUMENTS (Level 4 - Configuration)
// ============================================================================

/// How every simulated participant picks a symbol
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Always the first symbol
    Cooperate,
    /// Always the variant's default symbol
    Defect,
    /// Uniformly random symbol each round
    Random,
    /// Never submit; every move comes from the deadline
    Silent,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Variant to play
    #[arg(long, default_value = "win-as-much")]
    pub variant: String,

    /// Number of participants to queue
    #[arg(long, default_value = "8")]
    pub participants: usize,

    /// Participant behaviour
    #[arg(long, value_enum, default_value = "cooperate")]
    pub strategy: Strategy,

    /// Round deadline in milliseconds
    #[arg(long, default_value = "50")]
    pub deadline_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome of one simulation
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub variant: String,
    pub strategy: String,
    pub group_totals: Vec<(GroupId, i64)>,
    pub group_benchmark: i64,
    pub unmatched: usize,
    pub rounds_resolved: usize,
    pub auto_moves: usize,
}

impl SimulationReport {
    pub fn average_total(&self) -> f64 {
        if self.group_totals.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.group_totals.iter().map(|(_, t)| t).sum();
        sum as f64 / self.group_totals.len() as f64
    }
}

fn simulation_timing(deadline_ms: u64) -> Timing {
    Timing {
        round_deadline_ms: deadline_ms,
        result_display_ms: 0,
        ..Timing::fast()
    }
}

// ============================================================================
// LEVEL 1 - ORCHESTRATION
// ============================================================================

/// Run simulate command
///
/// This function reads like a table of contents:
/// 1. Build an engine that records everything
/// 2. Queue participants and form groups
/// 3. Play every group to the end
/// 4. Report totals against the benchmark
pub fn run(args: SimulateArgs, seed: Option<u64>) -> Result<()> {
    if args.deadline_ms == 0 {
        anyhow::bail!("Deadline must be positive");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(simulate(&args, seed))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report_results(&report);
    }
    Ok(())
}

/// Play a full simulation and return the report
pub async fn simulate(args: &SimulateArgs, seed: Option<u64>) -> Result<SimulationReport> {
    let registry = Arc::new(VariantRegistry::builtin());
    let variant = registry
        .get_str(&args.variant)
        .with_context(|| format!("Unknown variant: {}", args.variant))?;

    let recorder = Recorder::new();
    let engine = Engine::new(
        registry,
        simulation_timing(args.deadline_ms),
        seed,
        Ports::recording(recorder.clone()),
    );
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let key = QueueKey::new(variant.id().clone(), "SIM");
    let groups = form_groups(&engine, &key, args.participants)?;
    tracing::info!(
        "Simulating {} groups of {} ({} strategy)",
        groups.len(),
        variant.id(),
        format!("{:?}", args.strategy).to_lowercase()
    );

    let total_rounds = groups.len() as u64 * variant.round_count() as u64;
    let progress = ProgressBar::new(total_rounds);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} rounds {msg}") {
        progress.set_style(style);
    }

    play_out(&engine, &recorder, &groups, args.strategy, &mut rng, &progress).await?;
    progress.finish_with_message("done");

    let mut group_totals = Vec::with_capacity(groups.len());
    for &group in &groups {
        let snapshot = engine.snapshot(group)?;
        group_totals.push((group, snapshot.scores.iter().map(|s| s.total).sum()));
    }
    let results = recorder.results();

    Ok(SimulationReport {
        variant: variant.id().to_string(),
        strategy: format!("{:?}", args.strategy).to_lowercase(),
        group_totals,
        group_benchmark: variant.group_benchmark(),
        unmatched: engine.queue_size(&key),
        rounds_resolved: results.len(),
        auto_moves: results.iter().map(|r| r.auto_moves()).sum(),
    })
}

// ============================================================================
// LEVEL 2 - PHASES
// ============================================================================

/// Queue every participant; groups form as the queue fills
fn form_groups(engine: &Engine, key: &QueueKey, participants: usize) -> Result<Vec<GroupId>> {
    engine.open_queue(key)?;
    let mut groups = Vec::new();
    for i in 0..participants {
        let participant = ParticipantId::from(format!("sim-{:03}", i + 1));
        groups.extend(engine.join(key, participant)?.formed);
    }
    if groups.is_empty() {
        anyhow::bail!(
            "{} participants are not enough to form a group",
            participants
        );
    }
    Ok(groups)
}

/// Drive every group to completion
async fn play_out(
    engine: &Engine,
    recorder: &Recorder,
    groups: &[GroupId],
    strategy: Strategy,
    rng: &mut ChaCha8Rng,
    progress: &ProgressBar,
) -> Result<()> {
    if strategy != Strategy::Silent {
        loop {
            let mut active = 0;
            for &group in groups {
                if play_round(engine, group, strategy, rng)? {
                    active += 1;
                }
            }
            progress.set_position(recorder.results().len() as u64);
            if active == 0 {
                break;
            }
            // let any deadline fired mid-round settle
            tokio::task::yield_now().await;
        }
        return Ok(());
    }

    wait_for_deadlines(engine, recorder, progress).await
}

/// Print the report
fn report_results(report: &SimulationReport) {
    println!();
    println!(
        "{} x {} groups, strategy {}",
        report.variant,
        report.group_totals.len(),
        report.strategy
    );
    for (group, total) in &report.group_totals {
        println!(
            "  group {:>3}: {:>5}  (benchmark {})",
            group.0, total, report.group_benchmark
        );
    }
    println!(
        "Average {:.1} of {} | {} rounds, {} auto moves, {} unmatched",
        report.average_total(),
        report.group_benchmark,
        report.rounds_resolved,
        report.auto_moves,
        report.unmatched
    );
}

// ============================================================================
// LEVEL 3 - STEPS
// ============================================================================

/// Submit every member's move for the group's current round
///
/// Returns false once the group is no longer active.
fn play_round(
    engine: &Engine,
    group: GroupId,
    strategy: Strategy,
    rng: &mut ChaCha8Rng,
) -> Result<bool> {
    let snapshot = engine.snapshot(group)?;
    if snapshot.status != Status::Active {
        return Ok(false);
    }
    let variant = engine
        .registry()
        .get(&snapshot.variant)
        .context("group variant missing from registry")?;

    for member in &snapshot.members {
        let default = variant.symbol(variant.default_choice());
        let symbol = pick(strategy, variant.choices(), default, rng);
        match engine.submit_move(group, member, snapshot.current_round, symbol) {
            Ok(_) => {}
            // the deadline beat us to it
            Err(err) if err.is_protocol() => tracing::debug!("Move skipped: {}", err),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

/// Wait until every group has been played out by its deadlines
async fn wait_for_deadlines(
    engine: &Engine,
    recorder: &Recorder,
    progress: &ProgressBar,
) -> Result<()> {
    let per_round = engine.timing().round_deadline() + engine.timing().result_display();
    let rounds = engine
        .registry()
        .iter()
        .map(|v| v.round_count())
        .max()
        .unwrap_or(0);
    let limit = per_round * (rounds + 1) * 2 + Duration::from_secs(1);
    let started = tokio::time::Instant::now();

    while engine.counts().active > 0 {
        if started.elapsed() > limit {
            anyhow::bail!("Groups still active after {:?}", limit);
        }
        progress.set_position(recorder.results().len() as u64);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    progress.set_position(recorder.results().len() as u64);
    Ok(())
}

// ============================================================================
// LEVEL 4 - STRATEGIES
// ============================================================================

fn pick<'a>(
    strategy: Strategy,
    choices: &'a [String],
    default: &'a str,
    rng: &mut ChaCha8Rng,
) -> &'a str {
    match strategy {
        Strategy::Cooperate => choices.first().map(String::as_str).unwrap_or(default),
        Strategy::Defect | Strategy::Silent => default,
        Strategy::Random => choices
            .get(rng.gen_range(0..choices.len().max(1)))
            .map(String::as_str)
            .unwrap_or(default),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn args(variant: &str, participants: usize, strategy: Strategy) -> SimulateArgs {
        SimulateArgs {
            variant: variant.to_string(),
            participants,
            strategy,
            deadline_ms: if strategy == Strategy::Silent { 20 } else { 10_000 },
            json: false,
        }
    }

    #[tokio::test]
    async fn test_cooperators_hit_benchmark() {
        let report = simulate(&args("win-as-much", 9, Strategy::Cooperate), Some(1))
            .await
            .unwrap();
        assert_eq!(report.group_totals.len(), 2);
        assert_eq!(report.unmatched, 1);
        assert!(report.group_totals.iter().all(|(_, t)| *t == 76));
        assert_eq!(report.rounds_resolved, 16);
    }

    #[tokio::test]
    async fn test_defectors_score_negative_benchmark() {
        let report = simulate(&args("win-as-much", 4, Strategy::Defect), Some(1))
            .await
            .unwrap();
        assert_eq!(report.group_totals[0].1, -76);
    }

    #[tokio::test]
    async fn test_silent_groups_finish_on_deadlines() {
        let report = simulate(&args("stag-hunt", 3, Strategy::Silent), Some(1))
            .await
            .unwrap();
        assert_eq!(report.rounds_resolved, 6);
        assert_eq!(report.auto_moves, 18);
        assert_eq!(report.group_totals[0].1, 21);
    }

    #[tokio::test]
    async fn test_random_is_seeded() {
        let a = simulate(&args("majority", 10, Strategy::Random), Some(5))
            .await
            .unwrap();
        let b = simulate(&args("majority", 10, Strategy::Random), Some(5))
            .await
            .unwrap();
        let totals =
            |r: &SimulationReport| r.group_totals.iter().map(|(_, t)| *t).collect::<Vec<_>>();
        assert_eq!(totals(&a), totals(&b));
    }

    #[test]
    fn test_too_few_participants() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let err = runtime.block_on(simulate(&args("win-as-much", 3, Strategy::Cooperate), None));
        assert!(err.is_err());
    }

    #[test]
    fn test_pick() {
        let choices = vec!["Red".to_string(), "Blue".to_string()];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(pick(Strategy::Cooperate, &choices, "Blue", &mut rng), "Red");
        assert_eq!(pick(Strategy::Defect, &choices, "Blue", &mut rng), "Blue");
        assert!(choices.iter().any(|c| c == pick(Strategy::Random, &choices, "Blue", &mut rng)));
    }
}
