use clap::{ArgAction, Parser as CommandLineParser};
use dfa_engine::config::EngineConfig;
use dfa_engine::contracts::{ContractChecker, parse_contracts};
use dfa_engine::instructions::InstructionGraph;
use dfa_engine::interpreter::{Engine, NoOpListener};
use dfa_engine::loops::LoopInfo;
use dfa_engine::memory::MemoryState;
use dfa_engine::results::{AnalysisResult, AnchorFacts, RunOutcome};
use dfa_engine::values::ValueFactory;
use itertools::Itertools;
use log::{LevelFilter, info};
use utils::DiagnosticEmitter;

pub mod listing;

use listing::parse_listing;

#[derive(Debug, CommandLineParser, Default)]
#[command(
    name = "dfa",
    version,
    about = "Run the dataflow engine on an instruction listing."
)]
pub struct Opt {
    /// Print the parsed listing and stop.
    #[arg(long)]
    pub dump_listing: bool,

    /// Print the loops of the listing before analyzing it.
    #[arg(long)]
    pub loops: bool,

    /// Check contract clauses against the listing instead of reporting
    /// facts, e.g. "null -> fail; !null -> !null".
    #[arg(long, value_name = "CONTRACTS")]
    pub contracts: Option<String>,

    /// Number of states processed per instruction before giving up.
    #[arg(long, value_name = "STEPS")]
    pub step_limit: Option<usize>,

    /// Log more, can be repeated.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// File containing the instruction listing.
    pub filename: String,
}

impl Opt {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(limit) = self.step_limit {
            config.step_limit_per_instruction = limit;
        }
        config
    }
}

pub fn process_source(src: &str, diag: &mut DiagnosticEmitter, opts: &Opt) -> Option<()> {
    let values = ValueFactory::new();
    let graph = match parse_listing(src, &values) {
        Ok(graph) => graph,
        Err(error) => {
            diag.error(error.line, &error.message);
            return None;
        }
    };

    if opts.dump_listing {
        diag.out(&graph.listing(&values));
        return Some(());
    }

    if opts.loops {
        print_loops(&graph, diag);
    }

    let engine = Engine::new(&values, opts.engine_config());
    if let Some(text) = &opts.contracts {
        return check_contracts(&engine, &graph, text, diag);
    }

    info!("analyzing {} instruction(s)", graph.len());
    let result = engine.analyze(&graph, vec![MemoryState::new()], &mut NoOpListener);
    print_result(&result, diag)
}

fn print_loops(graph: &InstructionGraph, diag: &mut DiagnosticEmitter) {
    let loops = LoopInfo::new(graph);
    if loops.loop_count() == 0 {
        diag.out_ln("no loops");
    }
    for id in 1..=loops.loop_count() {
        diag.out_ln(&format!("loop {id}: {}", loops.members(id).iter().join(" ")));
    }
}

fn describe(facts: &AnchorFacts) -> String {
    let mut text = facts.facts.to_string();
    if let Some(constant) = facts.constant() {
        text.push_str(&format!(" = {constant}"));
    } else if facts.all_constant {
        text.push_str(&format!(" in {{{}}}", facts.constants.iter().join(", ")));
    }
    if facts.ephemeral_only {
        text.push_str(" (ephemeral)");
    }
    text
}

fn print_result(result: &AnalysisResult, diag: &mut DiagnosticEmitter) -> Option<()> {
    diag.out_ln(&format!("outcome: {}", result.outcome()));
    match result.outcome() {
        RunOutcome::Ok => {}
        RunOutcome::Aborted => {
            if let Some(report) = result.abort_report() {
                diag.err_ln(&format!(
                    "instruction {}: {}\nstate: {}\n{}",
                    report.index, report.error, report.state, report.listing
                ));
            }
            return None;
        }
        _ => return Some(()),
    }

    for (anchor, facts) in result.anchors().into_iter().flatten() {
        diag.out_ln(&format!("{anchor}: {}", describe(facts)));
    }
    for (anchor, failures) in result.all_call_failures().into_iter().flatten() {
        if failures.failing + failures.ephemeral > 0 {
            diag.out_ln(&format!(
                "{anchor}: call fails on {} path(s), {} ephemeral",
                failures.failing, failures.ephemeral
            ));
        }
    }
    if let Some(returned) = result.returned().filter(|r| r.hits > 0) {
        diag.out_ln(&format!("returns: {}", describe(returned)));
    }
    let unreachable = result.unreachable_anchors().unwrap_or_default();
    if !unreachable.is_empty() {
        diag.out_ln(&format!("unreachable: {}", unreachable.iter().join(" ")));
    }
    Some(())
}

fn check_contracts(
    engine: &Engine<'_>,
    graph: &InstructionGraph,
    text: &str,
    diag: &mut DiagnosticEmitter,
) -> Option<()> {
    let contracts = match parse_contracts(text, graph.parameters().len()) {
        Ok(contracts) => contracts,
        Err(error) => {
            diag.report_range(text, error.range, &error.message);
            return None;
        }
    };
    match ContractChecker::new(engine).check(graph, &contracts) {
        Ok(violations) if violations.is_empty() => diag.out_ln("contracts hold"),
        Ok(violations) => {
            for violation in violations {
                diag.out_ln(&format!("violation: {violation}"));
            }
        }
        Err(outcome) => diag.out_ln(&format!("contracts not checked: {outcome}")),
    }
    Some(())
}


#[cfg(test)]
mod driver_tests;
