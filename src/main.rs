//! mldata - download, cache and inspect machine learning datasets

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mldata::cache::{CacheManager, HttpFetcher};
use mldata::config::{
    CacheCommand, CliArgs, Command, ConfigCommand, ConfigOption, ConfigStore, ExportArgs, LoadArgs,
    OutputFormat, SelectionArgs, SplitArg,
};
use mldata::mnist::{Mnist, MnistData, MnistSplit, Split};

/// Pixel intensity ramp for rendering digits, darkest first
const RAMP: &[u8] = b" .:-=+*#%@";

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_config(args: &CliArgs) -> Result<Arc<ConfigStore>> {
    let config = match args.config {
        Some(ref path) => ConfigStore::open(path),
        None => ConfigStore::open_default(),
    };

    if let Some(ref base_dir) = args.base_dir {
        config.set_for_session(ConfigOption::BaseDir, &base_dir.display().to_string())?;
    }

    Ok(Arc::new(config))
}

fn open_mnist(config: Arc<ConfigStore>, quiet: bool) -> Mnist {
    let fetcher = HttpFetcher::from_config(&config).with_progress(!quiet);
    Mnist::new(CacheManager::new(config, Box::new(fetcher)))
}

/// Shuffle then reduce a split as requested
///
/// A split without a requested item count keeps all of its items.
fn apply_selection(split: &mut MnistSplit, selection: &SelectionArgs) -> Result<()> {
    if let Some(seed) = selection.shuffle {
        split.shuffle_seeded(seed);
    }

    let requested = match split.split() {
        Split::Train => selection.train_items,
        Split::Test => selection.test_items,
    };
    if let Some(n) = requested {
        if selection.balanced {
            split.balance(n)?;
        } else {
            split.take(n)?;
        }
    }
    Ok(())
}

fn select_all(mut data: MnistData, selection: &SelectionArgs) -> Result<MnistData> {
    apply_selection(&mut data.train, selection)?;
    apply_selection(&mut data.test, selection)?;
    Ok(data)
}

fn load_data(mnist: &Mnist, selection: &SelectionArgs) -> Result<MnistData> {
    let data = match selection.from_saved {
        Some(ref name) => mnist.load_saved(name)?,
        None => mnist.load_all()?,
    };
    select_all(data, selection)
}

fn load_one(mnist: &Mnist, split: Split, selection: &SelectionArgs) -> Result<MnistSplit> {
    let mut part = match selection.from_saved {
        Some(ref name) => mnist.load_saved(name)?.get(split).clone(),
        None => mnist.load_split(split)?,
    };
    apply_selection(&mut part, selection)?;
    Ok(part)
}

/// Render one image as ASCII art, if it is square
fn render_digit(split: &MnistSplit, idx: usize) -> Option<String> {
    let images = split.images();
    let pixels = images.as_u8()?;
    let side = match images.shape() {
        [_, rows, cols] if rows == cols => *rows,
        [_, len] => {
            let side = (*len as f64).sqrt() as usize;
            if side * side != *len {
                return None;
            }
            side
        }
        _ => return None,
    };

    let item = &pixels[idx * side * side..(idx + 1) * side * side];
    let mut out = String::with_capacity(side * (side + 1));
    for row in item.chunks(side) {
        for &p in row {
            out.push(RAMP[p as usize * (RAMP.len() - 1) / 255] as char);
        }
        out.push('\n');
    }
    Some(out)
}

fn print_summary(split: &MnistSplit, show: usize) {
    println!(
        "{}: images {:?} ({}), labels {:?}",
        split.split(),
        split.images().shape(),
        split.images().element().as_str(),
        split.labels().shape()
    );

    let counts = split.label_counts();
    let distribution: Vec<String> = counts.iter().map(|(l, c)| format!("{}:{}", l, c)).collect();
    println!("  labels: {}", distribution.join(" "));
    println!("  rarest label count: {}", split.min_label_count());

    for idx in 0..show.min(split.len()) {
        if let Some(art) = render_digit(split, idx) {
            println!("\n  #{} label {}", idx, split.label(idx));
            print!("{}", art);
        }
    }
    println!();
}

fn cmd_load(mnist: &Mnist, args: &LoadArgs) -> Result<()> {
    if args.list_saved {
        for name in mnist.saved()? {
            println!("{}", name);
        }
        return Ok(());
    }

    if args.refetch {
        mnist.refetch()?;
    }

    match args.split {
        SplitArg::All => {
            let data = load_data(mnist, &args.selection)?;
            print_summary(&data.train, args.show);
            print_summary(&data.test, args.show);
            if let Some(ref name) = args.save {
                let dir = mnist.save(name, &data)?;
                println!("Saved as '{}' in {}", name, dir.display());
            }
        }
        SplitArg::Train => print_summary(&load_one(mnist, Split::Train, &args.selection)?, args.show),
        SplitArg::Test => print_summary(&load_one(mnist, Split::Test, &args.selection)?, args.show),
    }
    Ok(())
}

fn cmd_export(mnist: &Mnist, args: &ExportArgs) -> Result<()> {
    let data = load_data(mnist, &args.selection)?.flatten();
    data.write_csv(&args.out_dir, !args.no_header)?;
    println!(
        "Wrote {} training and {} test rows to {}",
        data.train.len(),
        data.test.len(),
        args.out_dir.display()
    );
    Ok(())
}

fn cmd_config(config: &ConfigStore, command: &ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::List => {
            println!("# {}", config.path().display());
            for (option, value, overridden) in config.entries() {
                let marker = if overridden { "" } else { " (default)" };
                println!("{:<20} {}{}", option, value, marker);
            }
        }
        ConfigCommand::Get { option } => {
            let option: ConfigOption = option.parse()?;
            println!("{}", config.get(option));
        }
        ConfigCommand::Set { option, value } => {
            let option: ConfigOption = option.parse()?;
            config.set(option, value)?;
            info!("{} = {}", option, config.get(option));
        }
        ConfigCommand::Unset { option } => {
            let option: ConfigOption = option.parse()?;
            config.unset(option)?;
            info!("{} restored to {}", option, config.get(option));
        }
    }
    Ok(())
}

fn cmd_cache(mnist: &Mnist, command: &CacheCommand) -> Result<()> {
    let cache = mnist.cache();
    match command {
        CacheCommand::Status { output_format } => {
            let status = cache.status()?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => {
                    println!("Cache directory: {}", status.base_dir.display());
                    for usage in &status.datasets {
                        println!(
                            "  {:<12} {:>4} files {:>12} bytes",
                            usage.dataset, usage.files, usage.bytes
                        );
                    }
                    for split in Split::ALL {
                        let records = mnist.records(split);
                        for record in [&records.images, &records.labels] {
                            println!("  {:<20} {:?}", record.name(), cache.entry(record).state);
                        }
                    }
                    println!("Total: {} bytes", status.total_bytes());
                }
            }
        }
        CacheCommand::Clear { dataset } => {
            if cache.clear(dataset)? {
                println!("Cleared {}", dataset);
            } else {
                println!("Nothing cached for {}", dataset);
            }
        }
    }
    Ok(())
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet)?;

    args.validate()
        .map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))?;

    let config = open_config(&args)?;

    match args.command {
        Command::Config(ref command) => cmd_config(&config, command),
        Command::Cache(ref command) => cmd_cache(&open_mnist(config, args.quiet), command),
        Command::Load(ref load) => cmd_load(&open_mnist(config, args.quiet), load),
        Command::ExportCsv(ref export) => cmd_export(&open_mnist(config, args.quiet), export),
    }
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
