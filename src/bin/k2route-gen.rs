//! k2route-gen: compile Clash YAML configs into binary rule files.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use flate2::write::GzEncoder;
use flate2::Compression;

use k2route::compile::ClashCompiler;
use k2route::Ruleset;

#[derive(Parser)]
#[command(name = "k2route-gen", version, about = "Compile Clash rules into .k2r files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a Clash YAML config into a binary rule file
    Convert {
        /// Input Clash YAML file
        #[arg(short, long)]
        input: PathBuf,

        /// Output .k2r file (gets .gz appended with --gzip)
        #[arg(short, long)]
        output: PathBuf,

        /// Directory of rule-provider YAML files, keyed by file stem
        #[arg(short, long)]
        providers: Option<PathBuf>,

        /// Gzip-compress the output
        #[arg(short, long)]
        gzip: bool,
    },

    /// Print the header and slice index of a rule file
    Inspect {
        /// A .k2r or .k2r.gz file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Convert {
            input,
            output,
            providers,
            gzip,
        } => convert(&input, &output, providers.as_deref(), gzip),
        Command::Inspect { file } => inspect(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn convert(
    input: &std::path::Path,
    output: &std::path::Path,
    providers: Option<&std::path::Path>,
    gzip: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut compiler = ClashCompiler::new();
    if let Some(dir) = providers {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            );
            if !is_yaml {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            compiler.load_provider(name, &fs::read_to_string(&path)?)?;
            log::info!("loaded provider {name} from {}", path.display());
        }
    }

    let yaml = fs::read_to_string(input)?;
    let data = compiler.compile(&yaml)?;

    if gzip {
        let path = append_gz(output);
        let file = fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()?;
        log::info!("wrote {} ({} bytes raw)", path.display(), data.len());
    } else {
        fs::write(output, &data)?;
        log::info!("wrote {} ({} bytes)", output.display(), data.len());
    }
    Ok(())
}

fn inspect(file: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let ruleset = Ruleset::open(file)?;
    println!("fallback: {}", ruleset.fallback());
    println!("timestamp: {}", ruleset.timestamp());
    println!("slices: {}", ruleset.slice_count());
    for (index, entry) in ruleset.entries().iter().enumerate() {
        let kind = entry
            .kind()
            .map(|k| format!("{k:?}"))
            .unwrap_or_else(|| format!("unknown(0x{:02x})", entry.slice_type));
        println!(
            "  [{index}] {kind:<10} -> {:<6} offset={} size={} count={}",
            entry.target(),
            entry.offset,
            entry.size,
            entry.count
        );
    }
    Ok(())
}

fn append_gz(path: &std::path::Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    if !s.to_string_lossy().ends_with(".gz") {
        s.push(".gz");
    }
    PathBuf::from(s)
}
