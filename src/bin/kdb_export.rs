//! kdb-export - read a `.kdb` snapshot file and export it as CSV.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use kawana::store::codec::SnapshotDecoder;

/// Export a kawana snapshot as CSV, one row per tracked IP.
#[derive(Parser, Debug)]
#[command(name = "kdb-export", version, about)]
struct Args {
    /// Input .kdb file.
    input: PathBuf,

    /// Output csv filename.
    #[arg(long, default_value = "kawana.csv")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let input = File::open(&args.input)
        .with_context(|| format!("cannot open {}", args.input.display()))?;
    let records = SnapshotDecoder::new(BufReader::new(input))
        .decode()
        .with_context(|| format!("cannot decode {}", args.input.display()))?;

    let output = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let mut writer = BufWriter::new(output);

    writeln!(
        writer,
        "ip,cur_five_min,cur_hour,cur_day,max_five_min,max_hour,max_day,\
         start_five_min,start_hour,start_day,forgiven,flags"
    )?;

    let mut rows: Vec<_> = records.into_iter().collect();
    rows.sort_by_key(|(ip, _)| *ip);

    let count = rows.len();
    for (ip, rec) in rows {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            Ipv4Addr::from(ip),
            rec.current.five_min,
            rec.current.hour,
            rec.current.day,
            rec.maximum.five_min,
            rec.maximum.hour,
            rec.maximum.day,
            rec.starts.five_min,
            rec.starts.hour,
            rec.starts.day,
            rec.forgiven,
            rec.flags,
        )?;
    }
    writer.flush()?;

    println!(
        "Exported {} records from {} to {}",
        count,
        args.input.display(),
        args.output.display()
    );
    Ok(())
}
