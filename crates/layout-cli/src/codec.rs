//! `layout encode` and `layout decode`.

use anyhow::{Context, Result, bail};
use clap::Args;
use layout_core::{Decoded, MicroIdGrid, Serial, decode, encode};
use serde::Serialize;

use crate::output::emit;

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Serial to encode (1..=1048575).
    pub serial: u32,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// 25-bit row-major reading, e.g. `10001 01010 00000 00000 10001`.
    #[arg(num_args = 1.., required = true)]
    pub reading: Vec<String>,
}

#[derive(Serialize)]
struct EncodeReport {
    serial: String,
    value: u32,
    bits: String,
    dots: usize,
}

#[derive(Serialize)]
struct DecodeReport {
    #[serde(flatten)]
    decoded: Decoded,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial: Option<String>,
}

pub fn run_encode(args: &EncodeArgs, json: bool) -> Result<()> {
    let grid = encode(args.serial).with_context(|| format!("cannot encode {}", args.serial))?;
    let report = EncodeReport {
        serial: Serial::new(args.serial)?.to_string(),
        value: args.serial,
        bits: grid.to_bit_string(),
        dots: grid.dot_count(),
    };
    emit(&report, json, |r| {
        println!("serial {}", r.serial);
        println!("{grid}");
        println!("bits   {}", r.bits);
    })
}

pub fn run_decode(args: &DecodeArgs, json: bool) -> Result<()> {
    let reading = args.reading.join("");
    let grid = MicroIdGrid::parse_bits(&reading).context("unreadable grid")?;
    let decoded = decode(&grid);
    let report = DecodeReport {
        decoded,
        valid: decoded.is_valid(),
        serial: decoded.serial().map(|s| s.to_string()),
    };
    emit(&report, json, |r| {
        println!("{grid}");
        println!("value   {}", r.decoded.value);
        println!("parity  {}", ok(r.decoded.parity_valid));
        println!("anchors {}", ok(r.decoded.anchors_valid));
    })?;
    if !report.valid && !json {
        bail!("grid failed validation");
    }
    Ok(())
}

const fn ok(flag: bool) -> &'static str {
    if flag { "ok" } else { "FAILED" }
}
