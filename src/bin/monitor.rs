use clap::Parser;
use explorer_at::{
    Config, Explorer,
    device::{Device, PropertyMap, air_monitor::AirMonitor},
    embedded_hal::digital::{ErrorType, OutputPin},
    provision::{ConnectionState, Credentials},
    serial,
};
use std::{convert::Infallible, error::Error, time::Duration};
use tokio::time;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Product ID
    #[arg(long)]
    product_id: String,

    /// Device name, derived from the module's MAC address if omitted
    #[arg(long, default_value = "")]
    device_name: String,

    /// Device secret
    #[arg(long, default_value = "")]
    device_secret: String,

    /// Product secret, enables dynamic registration
    #[arg(long)]
    product_secret: Option<String>,

    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = serial::DEFAULT_BAUD_RATE)]
    baud_rate: u32,
}

/// Lamp printing its state instead of driving a pin.
struct ConsoleLamp;

impl ErrorType for ConsoleLamp {
    type Error = Infallible;
}

impl OutputPin for ConsoleLamp {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        println!("Lamp on");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        println!("Lamp off");
        Ok(())
    }
}

fn print_changes(old: &PropertyMap, new: &PropertyMap) {
    for (key, val) in new.iter() {
        if old.get(key) != Some(val) {
            println!("{key}: {val}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let port = serial::open(&args.port, args.baud_rate)?;
    let mut explorer = Explorer::new(port, serial::Delay, Config::default());
    let mut creds = Credentials::new(args.product_id, args.device_name, args.device_secret);

    if let Some(secret) = args.product_secret {
        creds = creds.with_product_secret(secret);
    }

    explorer.set_credentials(creds);

    let mut dev = AirMonitor::new(ConsoleLamp)?;

    loop {
        if explorer.state() != ConnectionState::Connected {
            match explorer.try_connect(&dev).await {
                Ok(true) => println!("Connected, monitoring {}", dev.kind()),
                Ok(false) => println!("No network, run smart_config to pair the module"),
                Err(err) => eprintln!("Error: {err}"),
            }

            if explorer.state() != ConnectionState::Connected {
                time::sleep(RETRY_DELAY).await;
                continue;
            }
        }

        let before = dev.properties().clone();

        if let Err(err) = explorer.poll(&mut dev).await {
            eprintln!("Error: {err}");
        }

        print_changes(&before, dev.properties());
        time::sleep(POLL_INTERVAL).await;
    }
}
