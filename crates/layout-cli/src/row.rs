//! `layout row`: the arrays a logical row spans.

use anyhow::{Context, Result};
use clap::Args;
use layout_core::{RowId, RowView};
use layout_engine::BatchPlanner;

use crate::output::emit;
use crate::session::SessionArgs;

#[derive(Args, Debug)]
pub struct RowArgs {
    /// Logical row (`row:<uuid>` or a bare uuid).
    pub row: RowId,
}

pub fn run(session: &SessionArgs, args: &RowArgs, json: bool) -> Result<()> {
    let session = session.open()?;
    let view = BatchPlanner::new(session.config)
        .row(&session.store, args.row)
        .with_context(|| format!("failed to load {}", args.row))?;
    emit(&view, json, print_row)
}

fn print_row(view: &RowView) {
    println!("{} ({}) spans {} arrays", view.row, view.category, view.arrays.len());
    for array in &view.arrays {
        println!("  {} [{}]", array.array, array.status);
        for item in &array.items {
            println!(
                "    slot {:>2}  {}  {}",
                item.slot.get(),
                item.order_ref,
                item.accessories
            );
        }
    }
}
