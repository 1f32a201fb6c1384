//! `dbi3cli` - CLI for the DBI3 log tool
//!
//! This binary downloads logs from an attached DBI3 and converts them into
//! tracks.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;

use dbi3::cli::{Cli, Command, ConfigCommand, ConvertCommand, LogsCommand, SyncCommand};
use dbi3::convert::{convert_file, ConversionOutcome};
use dbi3::device::SerialTransport;
use dbi3::{
    connect, init_logging, CatalogFilter, Config, ConversionPipeline, DeviceClient, DeviceLink,
    DeviceSerial, EncodedTimestamp, LogCatalogEntry, LogStore, SyncEngine,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Sync(cmd) => handle_sync(&config, &cmd),
        Command::Logs(cmd) => handle_logs(&config, cmd),
        Command::Convert(cmd) => handle_convert(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cli.config, cmd),
    }
}

/// Connect to the instrument, or report its absence and return `None`.
fn open_device(config: &Config) -> anyhow::Result<Option<(DeviceClient<SerialTransport>, DeviceSerial)>> {
    match connect(config).context("connecting to the DBI3")? {
        DeviceLink::Connected { client, serial } => Ok(Some((client, serial))),
        DeviceLink::NotPresent { reason } => {
            println!("DBI3 not connected: {reason}");
            Ok(None)
        }
    }
}

fn handle_sync(config: &Config, cmd: &SyncCommand) -> anyhow::Result<()> {
    let store = LogStore::open_or_create(config.log_path())?;
    let Some((mut client, serial)) = open_device(config)? else {
        return Ok(());
    };

    let filter = if cmd.all {
        CatalogFilter::default()
    } else {
        CatalogFilter::from_config(config)
    };
    let report = SyncEngine::new(&mut client, &store, serial.clone())
        .run(&filter, Utc::now().naive_utc())
        .context("syncing logs")?;
    client.close();

    println!("DBI3 {serial}: {report}");
    for (entry, reason) in &report.failed {
        println!("  failed {}: {reason}", entry.filename);
    }
    if let Some(reason) = &report.aborted {
        println!("  sync stopped early: {reason}");
    }

    if !cmd.no_convert {
        let kml_dir = config.kml_path();
        std::fs::create_dir_all(&kml_dir)
            .with_context(|| format!("creating {}", kml_dir.display()))?;
        let report = ConversionPipeline::new(&store, kml_dir, config.conversion_options())
            .with_force(cmd.force)
            .run(&serial)?;
        println!("Tracks: {report}");
    }
    Ok(())
}

fn handle_logs(config: &Config, cmd: LogsCommand) -> anyhow::Result<()> {
    let Some((mut client, serial)) = open_device(config)? else {
        return Ok(());
    };
    if let LogsCommand::Settings { show, json } = cmd {
        let settings = client.read_settings(&serial).context("reading DBI3 settings")?;
        client.close();
        let taken = Utc::now();
        if show {
            print!("{}", settings.report(&taken));
        } else {
            let store = LogStore::open_or_create(config.log_path())?;
            for path in store.write_settings(&settings, &taken, json)? {
                println!("Wrote {}", path.display());
            }
        }
        return Ok(());
    }
    let catalog = client.list_catalog().context("listing logs")?;

    match cmd {
        LogsCommand::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                println!("DBI3 {serial}: {} logs", catalog.len());
                for entry in &catalog {
                    let duration = entry
                        .duration()
                        .map_or_else(|| "?".to_string(), |d| format!("{}s", d.num_seconds()));
                    println!("  {entry}  {duration}");
                }
            }
        }
        LogsCommand::Download { names } => {
            let store = LogStore::open_or_create(config.log_path())?;
            let selected = pick(&catalog, &names)?;
            let report = SyncEngine::new(&mut client, &store, serial.clone())
                .synchronize(&selected)
                .context("downloading logs")?;
            println!("DBI3 {serial}: {report}");
        }
        LogsCommand::Delete { names, force, yes } => {
            if !yes {
                println!("This will delete {} log(s) from the DBI3.", names.len());
                println!("Use --yes to confirm.");
                client.close();
                return Ok(());
            }
            let store = LogStore::open_or_create(config.log_path())?;
            for entry in pick(&catalog, &names)? {
                if !force && !store.contains(&serial, &entry) {
                    println!("  {} not downloaded, keeping it (use --force)", entry.start);
                    continue;
                }
                if client.delete_log(&entry.start)? {
                    println!("  deleted {}", entry.start);
                } else {
                    println!("  DBI3 did not confirm deleting {}", entry.start);
                }
            }
            client.quiesce()?;
        }
        LogsCommand::Settings { .. } => {}
    }
    client.close();
    Ok(())
}

/// Catalog entries for the given encoded names.
fn pick(catalog: &[LogCatalogEntry], names: &[String]) -> anyhow::Result<Vec<LogCatalogEntry>> {
    let mut selected = Vec::new();
    for name in names {
        let name: EncodedTimestamp = name.parse().with_context(|| format!("bad log name '{name}'"))?;
        match catalog.iter().find(|entry| entry.start == name) {
            Some(entry) => selected.push(entry.clone()),
            None => bail!("no log named {name} on the DBI3"),
        }
    }
    Ok(selected)
}

fn handle_convert(config: &Config, cmd: &ConvertCommand) -> anyhow::Result<()> {
    let options = cmd.apply(config.conversion_options());

    if let Some(file) = &cmd.file {
        match convert_file(file, &options, cmd.force)? {
            ConversionOutcome::Written { path, points } => {
                println!("Wrote {} ({points} points)", path.display());
            }
            ConversionOutcome::Skipped(path) => {
                println!("{} exists (use --force to overwrite)", path.display());
            }
            ConversionOutcome::Empty => println!("{} has no GPS records", file.display()),
            ConversionOutcome::Incomplete => {
                println!("{} has no end record, not converted", file.display());
            }
        }
        return Ok(());
    }

    let store = LogStore::open(config.log_path())?;
    let serials = match &cmd.serial {
        Some(sn) => vec![DeviceSerial::new(sn)?],
        None => store.device_serials()?,
    };
    let pipeline = ConversionPipeline::new(&store, config.kml_path(), options).with_force(cmd.force);
    for serial in serials {
        let report = pipeline.run(&serial)?;
        println!("DBI3 {serial}: {report}");
        for (path, reason) in &report.failed {
            println!("  failed {}: {reason}", path.display());
        }
    }
    Ok(())
}

fn handle_config(
    config: &Config,
    config_path: Option<std::path::PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Paths]");
                println!("  Log path:           {}", config.log_path().display());
                println!("  KML path:           {}", config.kml_path().display());
                println!();
                println!("[Device]");
                println!(
                    "  Port:               {}",
                    config.device.com_port.as_deref().unwrap_or("auto")
                );
                println!("  Baud rate:          {}", config.device.baud_rate);
                println!(
                    "  USB id:             {:04x}:{:04x}",
                    config.device.usb_vid, config.device.usb_pid
                );
                println!();
                println!("[Conversion]");
                println!("  Format:             {}", config.conversion.format);
                println!("  Fields:             {}", config.conversion.fields);
                println!("  Altitude mode:      {}", config.conversion.altitude_mode);
                println!("  Extend to ground:   {}", config.conversion.extend_to_ground);
                println!("  Metric:             {}", config.conversion.use_metric);
                println!("  Prefer GPS:         {}", config.conversion.prefer_gps);
                println!();
                println!("[Filter]");
                println!("  New logs only:      {}", config.filter.new_logs_only);
                println!("  Skip invalid:       {}", config.filter.skip_invalid);
                println!("  Age limit (days):   {}", config.filter.age_limit_days);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
