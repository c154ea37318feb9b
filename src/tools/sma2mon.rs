// Monitor and download SMA inverters from the command line

use clap::{Arg, Command};

use smadata2::config::{Config, InverterConfig};
use smadata2::history::{self, MemoryStore};
use smadata2::{Connection, SmaError, util};

async fn connect_and_logon(inv: &InverterConfig) -> Result<Connection, SmaError> {
    let addr = inv.bluetooth.parse()?;
    let mut conn = smadata2::rfcomm::connect(addr).await?;
    conn.hello().await?;
    conn.logon(&inv.password, 900).await?;
    Ok(conn)
}

async fn status(config: &Config) -> Result<(), SmaError> {
    for inv in config.all_inverters() {
        println!("{}:", inv.label());
        let mut conn = connect_and_logon(inv).await?;

        let daily = conn.daily_yield().await?;
        println!(
            "\tDaily generation at {}:\t{} Wh",
            util::format_time(daily.timestamp),
            daily.yield_wh
        );
        let total = conn.total_yield().await?;
        println!(
            "\tTotal generation at {}:\t{} Wh",
            util::format_time(total.timestamp),
            total.yield_wh
        );
    }
    Ok(())
}

async fn signal(config: &Config) -> Result<(), SmaError> {
    for inv in config.all_inverters() {
        let addr = inv.bluetooth.parse()?;
        let mut conn = smadata2::rfcomm::connect(addr).await?;
        conn.hello().await?;
        let level = conn.get_signal().await?;
        println!("{}: signal {:.1}%", inv.label(), level);
    }
    Ok(())
}

async fn download(config: &Config) -> Result<(), SmaError> {
    let mut store = MemoryStore::new();
    for inv in config.all_inverters() {
        let mut conn = connect_and_logon(inv).await?;
        let (fast, daily) = history::sync_inverter(
            &mut conn,
            &mut store,
            inv.serial,
            inv.start_timestamp()?,
        )
        .await?;
        println!(
            "{}: downloaded {} fast and {} daily samples",
            inv.label(),
            fast.len(),
            daily.len()
        );
        if let Some(last) = fast.last() {
            println!(
                "\tlatest: {} at {} Wh",
                util::format_time(last.timestamp),
                last.yield_wh
            );
        }
    }
    Ok(())
}

async fn settime(config: &Config) -> Result<(), SmaError> {
    for inv in config.all_inverters() {
        let mut conn = connect_and_logon(inv).await?;
        conn.set_time(util::now_timestamp(), util::tz_offset()).await?;
        println!("{}: clock set", inv.label());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("sma2mon")
        .about("Talk to SMA inverters over Bluetooth")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the JSON configuration file"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("status").about("Show current yield readings"))
        .subcommand(Command::new("signal").about("Show Bluetooth signal strength"))
        .subcommand(Command::new("download").about("Download historic samples"))
        .subcommand(Command::new("settime").about("Set the inverter clocks"))
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_default();
            format!("{home}/.smadata2.json")
        });
    let config = match Config::from_path(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cannot read {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let res = match matches.subcommand() {
        Some(("status", _)) => status(&config).await,
        Some(("signal", _)) => signal(&config).await,
        Some(("download", _)) => download(&config).await,
        Some(("settime", _)) => settime(&config).await,
        _ => unreachable!("subcommand required"),
    };

    if let Err(e) = res {
        eprintln!("sma2mon: {e}");
        std::process::exit(1);
    }
}
