//! zipped-xml-to-json - convert an XML entry of a ZIP archive to JSON
//!
//! Usage: `zipped-xml-to-json <archive.zip> <entry.xml> <output.json>`
//!
//! Progress goes to stdout and errors to stderr, one line each. Exits 0 on
//! success and 1 on any failure.

use clap::Parser;
use medsync_ingest::convert::convert_archive;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "zipped-xml-to-json")]
#[command(version, about = "Convert an XML file inside a ZIP archive to JSON")]
struct Cli {
    /// ZIP archive to read
    archive: PathBuf,

    /// Name of the XML entry inside the archive
    entry: String,

    /// Where to write the JSON document
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        },
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        },
    };

    println!(
        "Converting '{}' from {} ...",
        cli.entry,
        cli.archive.display()
    );
    let started = Instant::now();

    match convert_archive(&cli.archive, &cli.entry, &cli.output) {
        Ok(summary) => {
            println!(
                "Wrote {} entries under <{}> to {} in {:.1}s",
                summary.entries,
                summary.root,
                cli.output.display(),
                started.elapsed().as_secs_f64()
            );
            ExitCode::SUCCESS
        },
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        },
    }
}
