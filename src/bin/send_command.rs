use clap::Parser;
use explorer_at::{Modem, command::PendingCommand, serial};
use std::{error::Error, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command to send, without line terminator (e.g. `AT+CIFSR`)
    command: String,

    /// Token marking a successful answer (may be repeated)
    #[arg(short = 'o', long = "ok", default_value = "OK\r\n")]
    success: Vec<String>,

    /// Token marking a failed answer (may be repeated)
    #[arg(short = 'f', long = "fail", default_value = "ERROR")]
    failure: Vec<String>,

    /// Answer timeout in seconds
    #[arg(short, long, default_value_t = 2.0)]
    timeout: f64,

    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = serial::DEFAULT_BAUD_RATE)]
    baud_rate: u32,
}

/// Turns runtime tokens into the static token lists commands are built from.
fn leak_tokens(tokens: Vec<String>) -> &'static [&'static str] {
    tokens
        .into_iter()
        .map(|token| &*token.leak())
        .collect::<Vec<_>>()
        .leak()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let port = serial::open(&args.port, args.baud_rate)?;
    let mut modem = Modem::new(port, serial::Delay);
    let cmd = PendingCommand::raw(
        args.command,
        leak_tokens(args.success),
        leak_tokens(args.failure),
        Duration::try_from_secs_f64(args.timeout)?,
    );

    let ack = modem.execute(&cmd).await?;

    print!("{ack}");

    Ok(())
}
