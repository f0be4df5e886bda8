//! `layout array <action>`: the array workflow.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use layout_core::{ArrayRef, ArraySeq, BatchId};
use layout_engine::{ArrayWorkflow, StampSheet};
use serde::Serialize;

use crate::output::emit;
use crate::session::{Session, SessionArgs};

#[derive(Args, Debug)]
pub struct ArrayArgs {
    #[command(subcommand)]
    pub action: ArrayAction,
}

#[derive(Subcommand, Debug)]
pub enum ArrayAction {
    /// Reserve serials and bind the identifier (pending → in progress).
    Start(Target),
    /// Engrave the reserved serials (in progress → done).
    Complete(Target),
    /// Void the reserved serials and reserve fresh ones.
    Retry(Target),
    /// Void the reserved serials; the array stays in progress.
    Abandon(Target),
    /// Print whether the array is done.
    Status(Target),
    /// Print the identifier and serials of an in-progress array.
    Sheet(Target),
}

#[derive(Args, Debug)]
pub struct Target {
    #[arg(long, short = 'b')]
    pub batch: BatchId,

    /// Array sequence number within the batch.
    #[arg(long, short = 's')]
    pub seq: u32,
}

impl Target {
    fn array(&self) -> ArrayRef {
        ArrayRef::new(self.batch.clone(), ArraySeq::new(self.seq))
    }
}

#[derive(Serialize)]
struct StatusReport {
    array: ArrayRef,
    done: bool,
}

#[derive(Serialize)]
struct AbandonReport {
    array: ArrayRef,
    voided: usize,
}

pub fn run(session: &SessionArgs, args: &ArrayArgs, json: bool) -> Result<()> {
    let Session { config, store } = session.open()?;
    let workflow = ArrayWorkflow::new(config);
    match &args.action {
        ArrayAction::Start(target) => {
            let array = target.array();
            let sheet = workflow
                .start_array(&store, &array)
                .with_context(|| format!("failed to start {array}"))?;
            emit(&sheet, json, print_sheet)
        }
        ArrayAction::Complete(target) => {
            let array = target.array();
            let done = workflow
                .complete_array(&store, &array)
                .with_context(|| format!("failed to complete {array}"))?;
            emit(&done, json, |d| {
                println!(
                    "{} done: {} serials engraved ({} already engraved)",
                    d.array.array, d.report.engraved_now, d.report.already_engraved
                );
            })
        }
        ArrayAction::Retry(target) => {
            let array = target.array();
            let sheet = workflow
                .retry_array(&store, &array)
                .with_context(|| format!("failed to retry {array}"))?;
            emit(&sheet, json, print_sheet)
        }
        ArrayAction::Abandon(target) => {
            let array = target.array();
            let voided = workflow
                .abandon_array(&store, &array)
                .with_context(|| format!("failed to abandon {array}"))?;
            emit(&AbandonReport { array, voided }, json, |r| {
                println!("{}: {} serials voided", r.array, r.voided);
            })
        }
        ArrayAction::Status(target) => {
            let array = target.array();
            let done = workflow
                .is_array_done(&store, &array)
                .with_context(|| format!("failed to read {array}"))?;
            emit(&StatusReport { array, done }, json, |r| {
                println!("{}: {}", r.array, if r.done { "done" } else { "not done" });
            })
        }
        ArrayAction::Sheet(target) => {
            let array = target.array();
            let sheet = workflow
                .stamp_sheet(&store, &array)
                .with_context(|| format!("failed to read {array}"))?;
            emit(&sheet, json, print_sheet)
        }
    }
}

fn print_sheet(sheet: &StampSheet) {
    println!(
        "{} [{}] identifier {}",
        sheet.array.array, sheet.array.status, sheet.identifier
    );
    for (slot, serial) in &sheet.serials {
        println!("  slot {:>2}  serial {serial}", slot.get());
    }
}
