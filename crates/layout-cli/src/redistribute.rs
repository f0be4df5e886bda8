//! `layout redistribute`: re-pack a row at a new start offset.

use anyhow::{Context, Result};
use clap::Args;
use layout_core::{ArraySeq, RowId, SlotPosition};
use layout_engine::{RedistributionEngine, RedistributionReport, UnusableSlots};

use crate::output::emit;
use crate::session::SessionArgs;

#[derive(Args, Debug)]
pub struct RedistributeArgs {
    /// Logical row to move (`row:<uuid>` or a bare uuid).
    #[arg(long, short = 'r')]
    pub row: RowId,

    /// New start slot.
    #[arg(long, short = 'o')]
    pub offset: u8,

    /// Faulty slot to pack around, as ARRAY_SEQ:SLOT. Repeatable.
    #[arg(long = "unusable", short = 'u', value_parser = parse_unusable)]
    pub unusable: Vec<(ArraySeq, SlotPosition)>,
}

pub fn run(session: &SessionArgs, args: &RedistributeArgs, json: bool) -> Result<()> {
    let offset = SlotPosition::new(args.offset)?;
    let mut unusable = UnusableSlots::new();
    for (seq, slot) in &args.unusable {
        unusable.mark(*seq, *slot);
    }
    let session = session.open()?;
    let report = RedistributionEngine::new(session.config)
        .redistribute_around(&session.store, args.row, offset, &unusable)
        .with_context(|| format!("failed to redistribute {}", args.row))?;
    emit(&report, json, print_report)
}

fn parse_unusable(raw: &str) -> Result<(ArraySeq, SlotPosition), String> {
    let (seq, slot) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ARRAY_SEQ:SLOT, got {raw:?}"))?;
    let seq = seq
        .parse::<u32>()
        .map_err(|e| format!("array {seq:?}: {e}"))?;
    let slot = slot
        .parse::<u8>()
        .map_err(|e| format!("slot {slot:?}: {e}"))
        .and_then(|n| SlotPosition::new(n).map_err(|e| e.to_string()))?;
    Ok((ArraySeq::new(seq), slot))
}

fn print_report(report: &RedistributionReport) {
    if report.is_noop() {
        println!(
            "{} already starts at slot {}; nothing moved",
            report.row, report.start_offset
        );
        return;
    }
    let seqs = |seqs: &[ArraySeq]| {
        seqs.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    println!(
        "{}: moved {} of {} items to start at slot {}",
        report.row, report.moved, report.item_count, report.start_offset
    );
    println!(
        "  arrays before [{}] after [{}]",
        seqs(&report.before),
        seqs(&report.after)
    );
    if !report.allocated.is_empty() {
        println!("  new arrays [{}]", seqs(&report.allocated));
    }
    if report.serials_voided > 0 || report.serials_reserved > 0 {
        println!(
            "  serials voided {} reserved {}",
            report.serials_voided, report.serials_reserved
        );
    }
}
