use clap::Parser;
use explorer_at::{Config, Explorer, serial};
use std::{error::Error, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Time to complete pairing on the phone, in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = serial::DEFAULT_BAUD_RATE)]
    baud_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let port = serial::open(&args.port, args.baud_rate)?;
    let config = Config::default().with_smart_config_timeout(Duration::from_secs(args.timeout));
    let mut explorer = Explorer::new(port, serial::Delay, config);

    explorer.probe().await?;

    println!(
        "Waiting {}s for pairing, use the phone app to configure Wi-Fi",
        args.timeout
    );

    if let Err(err) = explorer.smart_config(None).await {
        explorer.stop_smart_config().await?;

        return Err(err.into());
    }

    println!("IP address: {}", explorer.get_ip().await?);
    println!("MAC address: {}", explorer.get_mac().await?);

    Ok(())
}
