//! `layout plan`: create a batch from a JSON item list.
//!
//! The item file holds an array of items:
//!
//! ```text
//! [
//!   { "category": "CUBE", "order_ref": "ORD-1", "accessories": ["LED"] },
//!   { "category": "CUBE", "order_ref": "ORD-2", "subtype": "rev-b" }
//! ]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use layout_core::{BatchId, Category, NewItem, SlotPosition};
use layout_engine::{BatchPlan, BatchPlanner, BatchRequest};

use crate::output::emit;
use crate::session::SessionArgs;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Batch identifier.
    #[arg(long, short = 'b')]
    pub batch: BatchId,

    /// JSON file with the items; `-` reads stdin.
    #[arg(long, short = 'i')]
    pub items: PathBuf,

    /// Slot the first array of each category starts at.
    #[arg(long, default_value_t = 1)]
    pub offset: u8,

    /// Per-category start slot, `CATEGORY=SLOT`; repeatable.
    #[arg(long = "category-offset", value_parser = parse_category_offset)]
    pub category_offsets: Vec<(Category, SlotPosition)>,
}

pub fn run(session: &SessionArgs, args: &PlanArgs, json: bool) -> Result<()> {
    let items = read_items(&args.items)?;
    let mut request = BatchRequest::new(args.batch.clone(), items)
        .with_start_offset(SlotPosition::new(args.offset)?);
    for (category, offset) in &args.category_offsets {
        request = request.with_category_offset(category.clone(), *offset);
    }

    let session = session.open()?;
    let plan = BatchPlanner::new(session.config)
        .create_batch(&session.store, request)
        .with_context(|| format!("failed to plan batch {}", args.batch))?;
    emit(&plan, json, print_plan)
}

fn read_items(path: &PathBuf) -> Result<Vec<NewItem>> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read items from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("invalid item list in {}", path.display()))
}

fn parse_category_offset(raw: &str) -> Result<(Category, SlotPosition), String> {
    let (category, slot) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=SLOT, got {raw:?}"))?;
    let category = Category::new(category).map_err(|e| e.to_string())?;
    let slot = slot
        .parse::<u8>()
        .map_err(|e| format!("slot {slot:?}: {e}"))
        .and_then(|n| SlotPosition::new(n).map_err(|e| e.to_string()))?;
    Ok((category, slot))
}

fn print_plan(plan: &BatchPlan) {
    println!(
        "batch {}: {} items on {} arrays",
        plan.batch,
        plan.item_count(),
        plan.array_count()
    );
    for category in &plan.categories {
        println!(
            "  {} from slot {} ({} accessory changes)",
            category.category, category.start_offset, category.transitions
        );
        for array in &category.arrays {
            let slots: Vec<String> = array
                .occupied_slots()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("    {}  {}  slots {}", array.array, array.row, slots.join(","));
        }
    }
}
